//! Channel adapters behind the executor contracts in `leadline-core`.

pub mod bland;
pub mod factory;
pub mod ghl;
mod http;
pub mod log_only;
pub mod meta;
pub mod openai;
pub mod openphone;

pub use bland::BlandCaller;
pub use factory::{build_completion_client, build_executors};
pub use ghl::GhlContactMutator;
pub use leadline_core::phone::normalize_e164;
pub use log_only::{LogOnlyChannels, UnconfiguredChannel};
pub use meta::MetaConversionsSink;
pub use openai::OpenAiCompletion;
pub use openphone::OpenPhoneSender;
