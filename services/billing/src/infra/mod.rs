pub mod db;
pub mod email;
pub mod http;
pub mod ledger;
