// Purpose: voice management, monophonic key tracking, block processing
// This layer sits above the modulation chains and drives them per voice

pub mod allocator;
pub mod engine;
pub mod message;
pub mod mono;
pub mod voice;
