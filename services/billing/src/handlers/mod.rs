pub mod dead_letter;
pub mod outbox;
pub mod webhook;
