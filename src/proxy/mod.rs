pub mod dispatcher;
pub mod providers;
pub mod upstream;
