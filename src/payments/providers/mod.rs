pub mod paychangu;
