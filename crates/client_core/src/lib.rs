pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod rest;
pub mod search;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;

pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, Notifier, Notify, NotifyPolicy,
    PushEvent,
};
pub use dispatcher::{MessageDispatcher, SendOutcome};
pub use error::ClientError;
pub use rest::{AuthApi, ChatApi, DirectoryApi, RestApi};
pub use search::{SearchController, SearchEvent};
pub use session::Session;
pub use store::{ConversationStore, DeliveryState, StoredMessage};
pub use sync::{ChatEvent, SyncEngine};
pub use transport::{PushSink, PushStream, PushTransport, WebSocketTransport};
