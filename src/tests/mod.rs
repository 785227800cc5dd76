//! Unit and property tests.
//!
//! Shared mocks for the external seams (message sender, message router,
//! global capabilities client) live in `support`.

mod support;

mod message_tests;
mod registrar_tests;
mod store_tests;
mod subscription_tests;
mod timer_tests;
