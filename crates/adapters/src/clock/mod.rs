pub mod boot_clock;
