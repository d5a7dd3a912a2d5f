use leptos::prelude::*;

use crate::components::trust_graph::{GraphData, GraphLink, GraphNode, TrustGraphCanvas};
use crate::{load_graph_config, load_graph_data};

const COMMUNITIES: [&str; 6] = ["Harbor", "Mill", "Orchard", "Quarry", "Ridge", "Market"];

/// Sample trust network: a handful of communities, dense trust inside each
/// and a few bridges between them.
fn sample_network(n: usize) -> GraphData {
	let groups = COMMUNITIES.len();
	let nodes: Vec<GraphNode> = (0..n)
		.map(|i| GraphNode {
			id: format!("p{i}"),
			label: (i < groups).then(|| format!("{} co-op", COMMUNITIES[i])),
			group: Some((i % groups) as u32),
		})
		.collect();

	let mut links = Vec::new();
	for i in groups..n {
		// someone earlier in the same community
		let peer = i % groups + groups * ((rand_simple(i) * ((i / groups) as f64)) as usize);
		links.push(GraphLink {
			source: format!("p{i}"),
			target: format!("p{peer}"),
		});
		if rand_simple(i * 7) > 0.85 {
			let other = (rand_simple(i * 13) * i as f64) as usize;
			links.push(GraphLink {
				source: format!("p{other}"),
				target: format!("p{i}"),
			});
		}
	}
	GraphData { nodes, links }
}

/// Simple pseudo-random number generator (deterministic for consistency).
fn rand_simple(seed: usize) -> f64 {
	let x = ((seed + 1) * 9301 + 49297) % 233280;
	(x as f64) / 233280.0
}

/// Default Home Page
#[component]
pub fn Home() -> impl IntoView {
	let graph = load_graph_data().unwrap_or_else(|| sample_network(90));
	let graph_data = Signal::derive(move || graph.clone());
	let config = load_graph_config();
	let (frozen, set_frozen) = signal(false);

	view! {
		<ErrorBoundary fallback=|errors| {
			view! {
				<h1>"Uh oh! Something went wrong!"</h1>

				<p>"Errors: "</p>
				<ul>
					{move || {
						errors
							.get()
							.into_iter()
							.map(|(_, e)| view! { <li>{e.to_string()}</li> })
							.collect_view()
					}}
				</ul>
			}
		}>

			<div class="fullscreen-graph">
				<TrustGraphCanvas
					data=graph_data
					config=config
					fullscreen=true
					physics_enabled=Signal::derive(move || !frozen.get())
				/>
				<div class="graph-overlay">
					<h1>"Trust Network"</h1>
					<p class="subtitle">
						"Drag a participant to pin it. Scroll to zoom. Drag the background to pan. Double-click for trustlines."
					</p>
					<button on:click=move |_| set_frozen.update(|f| *f = !*f)>
						{move || if frozen.get() { "Resume layout" } else { "Freeze layout" }}
					</button>
				</div>
			</div>
		</ErrorBoundary>
	}
}
