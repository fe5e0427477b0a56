pub mod admin;
pub mod health;
pub mod oauth;
pub mod webhook;
