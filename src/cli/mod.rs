//! Terminal front end: one module per subcommand plus shared styling.

pub mod compare;
pub mod funds;
pub mod setup;
pub mod ui;
