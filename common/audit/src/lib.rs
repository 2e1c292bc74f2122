pub mod config;
pub mod manager;
pub mod memory;
pub mod model;
pub mod producer;

pub use config::ProducerConfig;
pub use manager::{ConnectionManager, ManagerSlot};
pub use memory::{Attempt, MemoryBroker};
pub use model::{DeliveryReport, ManagerState, PublishError, PublishResult, PublishedMessage};
pub use producer::{BrokerClient, DeliveryHandle, DeliveryTicket};
// Export the rdkafka client and process-wide slot only when kafka-producer (or the kafka umbrella) is enabled.
#[cfg(feature = "kafka-producer")]
pub use manager::shared_slot;
#[cfg(feature = "kafka-producer")]
pub use producer::{DeliveryContext, KafkaBrokerClient};
