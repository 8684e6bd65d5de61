pub mod doctor;
pub mod hook;
pub mod install;
