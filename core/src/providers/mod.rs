pub mod factory;
pub mod openai;

pub use factory::{create_pool, create_pool_with_model, create_provider, create_provider_for_model};
pub use openai::OpenAIProvider;
