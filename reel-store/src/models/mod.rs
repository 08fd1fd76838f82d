//! Data models for the item store

pub mod item;

pub use item::Item;
