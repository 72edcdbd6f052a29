pub mod alerts;
pub mod children;
mod helpers;
pub mod node;
pub mod tree;
