pub mod offload_map_manager;
