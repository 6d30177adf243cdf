pub mod profiles;
pub mod stages;
