pub mod catalog_import;
pub mod db;
pub mod demand;
pub mod grouping;
pub mod item_state;
pub mod models;
pub mod reconcile;
pub mod service;
pub mod units;
