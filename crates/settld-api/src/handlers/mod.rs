pub mod agents;
pub mod gate;
pub mod grants;
pub mod receipts;
pub mod sessions;
pub mod settlement;
pub mod wallet;
