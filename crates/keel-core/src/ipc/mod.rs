//! Inter-process request routing.

pub mod binding;
pub mod frame;
pub mod pubsub;
pub mod registry;
pub mod result;
pub mod router;
pub mod transport;

pub use binding::{BindingHandle, BindingInfo, BoxedHandler, Handler, HandlerEvent, ProgressFn};
pub use frame::{CorrelationId, Frame, InvokeRequest};
pub use pubsub::{Subscription, TOPIC_PREFIX, topic_channel};
pub use registry::{BindingMap, BindingRegistry};
pub use result::{InvokeItem, InvokeResultSet, is_empty_value};
pub use router::{DEFAULT_INVOKE_TIMEOUT, InvokeOptions, IpcRouter, is_reserved_channel};
pub use transport::{Bus, Transport};
