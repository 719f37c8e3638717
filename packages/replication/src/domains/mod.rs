pub mod eventsourcing;
pub mod replica;
