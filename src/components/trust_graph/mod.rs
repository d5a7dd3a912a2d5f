//! Trust network canvas: scheduling, physics, picking, camera and pointer
//! handling behind a single Leptos component.

mod camera;
mod component;
mod config;
mod error;
mod fx;
mod host;
mod intensity;
mod interaction;
mod physics;
mod picker;
mod render;
mod render_loop;
mod types;
mod web_host;

pub use component::TrustGraphCanvas;
pub use config::GraphConfig;
pub use types::{GraphData, GraphLink, GraphNode, QualityTier};
