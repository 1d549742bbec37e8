pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod interceptor;
pub mod middleware;
pub mod persistence;
pub mod rls;
pub mod tenancy;
