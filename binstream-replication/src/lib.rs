//! Replication-side building blocks of binstream: the durable binlog
//! position, the replication client, the table catalog and the event decoder
//! that turns raw binlog frames into canonical [`DataChangeEvent`]s.

pub mod catalog;
pub mod connector;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod frame;
pub mod position;
pub mod position_store;

pub use catalog::{ColumnInfo, MySqlSchemaProvider, SchemaProvider, TableCatalog, TableInfo};
pub use connector::{
    BinlogSource, MySqlBinlogConnector, MySqlSourceFactory, ReplicationConfig, SourceFactory,
};
pub use decoder::{DataChangeEvent, DecodeOutcome, EventDecoder, RowRecord};
pub use error::{ReplicationError, ReplicationResult};
pub use filter::SchemaFilter;
pub use frame::{BinlogFrame, FrameBody, FrameHeader};
pub use position::BinlogPosition;
pub use position_store::{
    FilePositionStore, KvPositionStore, PositionKv, PositionStore, LAST_POSITION_KEY,
};
