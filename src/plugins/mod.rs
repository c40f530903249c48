//! Built-in plugins (C12) — implementations of the `Plugin` trait that
//! ship with the daemon itself, rather than being loaded from outside.

pub mod standard_schemas;
pub mod test_plugin;
