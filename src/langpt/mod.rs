pub mod anthropic;
pub mod conversation;
pub mod display;
pub mod mock;
pub mod openai_compat;
pub mod prompts;
pub mod response;
pub mod supabase;
pub mod types;
pub mod usage;
