pub mod postgres;

pub use postgres::PostgresAccountStore;
