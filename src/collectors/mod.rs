pub mod feed;
pub mod panel;
