pub mod assistant;
pub mod channels;
pub mod coordinator;
pub mod escalation;
pub mod kb;
pub mod markup;
pub mod menu;
pub mod reminder;
pub mod shared;
pub mod storage;
pub mod telegram;
