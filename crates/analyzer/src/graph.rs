use std::collections::HashMap;

/// Relative edge weights for the rank computation. A nofollow link
/// still carries signal, just an order of magnitude less.
pub const FOLLOW_WEIGHT: f64 = 1.0;
pub const NOFOLLOW_WEIGHT: f64 = 0.1;

/// Directed link graph with interned URL nodes and weighted edges.
#[derive(Default)]
pub struct LinkGraph {
    ids: HashMap<String, usize>,
    urls: Vec<String>,
    out_edges: Vec<Vec<(usize, f64)>>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, url: &str) -> usize {
        if let Some(&id) = self.ids.get(url) {
            return id;
        }
        let id = self.urls.len();
        self.ids.insert(url.to_string(), id);
        self.urls.push(url.to_string());
        self.out_edges.push(Vec::new());
        id
    }

    pub fn add_edge(&mut self, source: &str, target: &str, nofollow: bool) {
        let source = self.intern(source);
        let target = self.intern(target);
        let weight = if nofollow {
            NOFOLLOW_WEIGHT
        } else {
            FOLLOW_WEIGHT
        };
        self.out_edges[source].push((target, weight));
    }

    pub fn node_count(&self) -> usize {
        self.urls.len()
    }

    pub fn url(&self, id: usize) -> &str {
        &self.urls[id]
    }

    pub fn node_id(&self, url: &str) -> Option<usize> {
        self.ids.get(url).copied()
    }

    pub fn out_edges(&self, id: usize) -> &[(usize, f64)] {
        &self.out_edges[id]
    }

    pub fn edge_count(&self) -> usize {
        self.out_edges.iter().map(Vec::len).sum()
    }
}
