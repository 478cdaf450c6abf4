pub mod fs_probe;
pub mod icon_service;
pub mod integrity_service;
pub mod inventory_service;
pub mod uninstall_command;
