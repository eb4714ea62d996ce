pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod model;
pub mod provider;
pub mod stream;
pub mod tools;

pub use errors::ProviderError;
pub use events::{TurnEmitter, TurnEvent};
pub use ids::{SessionId, TurnId};
pub use messages::{ChatMessage, Role};
pub use model::{ModelDescriptor, Provider};
pub use provider::CompletionClient;
pub use stream::{TokenEvent, TokenStream};
