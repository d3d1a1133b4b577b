pub mod components;
pub mod registry;
pub mod status;
pub mod systems;
