pub mod uint;
