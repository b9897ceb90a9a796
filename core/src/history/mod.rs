pub mod factory;
pub mod in_memory;

pub use factory::create_history_store;
pub use in_memory::InMemoryHistory;
