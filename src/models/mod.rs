pub mod forecast_models;
pub mod ned_models;
