pub mod conversations;
pub mod follow_up;
pub mod health;
pub mod leads;
