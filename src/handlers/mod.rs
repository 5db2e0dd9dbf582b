pub mod forecast;
pub mod history;
pub mod ned;
