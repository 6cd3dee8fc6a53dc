pub mod directory;

pub use directory::AssetDirectory;
