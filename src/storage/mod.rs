pub mod backend;
pub mod codec;
pub mod index;
pub mod keyspace;
pub mod memory;
pub mod table;
