pub mod broadcast;
pub mod discovery;
pub mod invoker;
pub mod parse;
