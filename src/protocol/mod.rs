pub mod app;
pub mod canonical;
pub mod chat;
pub mod mistral;
pub mod openai;
