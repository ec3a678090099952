mod blocks;
mod fullvae;
mod iwtvae;
mod loss;
mod masknet;
mod wtcnn;
mod wtvae;

pub use blocks::*;
pub use fullvae::*;
pub use iwtvae::*;
pub use loss::*;
pub use masknet::*;
pub use wtcnn::*;
pub use wtvae::*;
