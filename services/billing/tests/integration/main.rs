mod helpers;

mod notification_test;
mod outbox_test;
mod router_test;
