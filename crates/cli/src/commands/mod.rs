pub mod compare;
pub mod scan;
pub mod tags;
pub mod window;
