pub mod postgres;

pub use postgres::PostgresRecordStore;
