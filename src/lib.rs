//! Leptos client-side app wiring and routes for the trust network viewer.

use leptos::prelude::*;
use leptos_meta::*;
use leptos_router::components::*;
use leptos_router::path;
use log::{Level, info, warn};
use wasm_bindgen::JsCast;
use web_sys::{HtmlScriptElement, Window};

// Modules
mod components;
mod pages;

pub use components::trust_graph::{
	GraphConfig, GraphData, GraphLink, GraphNode, QualityTier, TrustGraphCanvas,
};

// Top-Level pages
use crate::pages::home::Home;

/// Initialize logging and panic hooks for the WASM target.
pub fn init_logging() {
	let _ = console_log::init_with_level(Level::Debug);
	console_error_panic_hook::set_once();
	info!("trust-graph: logging initialized");
}

fn script_text(id: &str) -> Option<String> {
	let window: Window = web_sys::window()?;
	let element = window.document()?.get_element_by_id(id)?;
	let script: HtmlScriptElement = element.dyn_into().ok()?;
	script.text().ok()
}

/// Graph data from a `<script id="graph-data">` element, if the page has one.
pub(crate) fn load_graph_data() -> Option<GraphData> {
	let json_text = script_text("graph-data")?;
	match serde_json::from_str::<GraphData>(&json_text) {
		Ok(data) => {
			info!(
				"trust-graph: loaded {} participants, {} trustlines",
				data.nodes.len(),
				data.links.len()
			);
			Some(data)
		}
		Err(e) => {
			warn!("trust-graph: failed to parse graph data: {}", e);
			None
		}
	}
}

/// Tuning from a `<script id="graph-config">` element; defaults otherwise.
pub(crate) fn load_graph_config() -> GraphConfig {
	script_text("graph-config")
		.map(|text| GraphConfig::from_json(&text))
		.unwrap_or_default()
}

/// An app router which renders the trust network on the homepage
#[component]
pub fn App() -> impl IntoView {
	// Provides context that manages stylesheets, titles, meta tags, etc.
	provide_meta_context();

	view! {
		<Html attr:lang="en" attr:dir="ltr" attr:data-theme="dark" />

		<Title text="Trust Network" />

		<Meta charset="UTF-8" />
		<Meta name="viewport" content="width=device-width, initial-scale=1.0" />

		<Router>
			<Routes fallback=|| view! { <p class="not-found">"Page not found."</p> }>
				<Route path=path!("/") view=Home />
			</Routes>
		</Router>
	}
}
