pub mod archive;
pub mod combine;
pub mod providers;
pub mod queue;
pub mod retry;
pub mod template;
