pub mod trust_graph;
