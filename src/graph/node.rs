use parking_lot::Mutex;

/// A single coarse-graph node: an immutable centroid vector plus one
/// mutable adjacency list per layer it participates in.
///
/// Each layer's neighbour list is guarded by its own mutex (spec §5:
/// "each node has a mutex guarding its neighbour list"), so concurrent
/// inserts touching different nodes never contend with each other, and
/// inserts touching the same node at different layers only briefly
/// contend on that one layer's lock.
pub struct NodeInner {
    pub vector: Vec<f32>,
    pub layer_max: usize,
    connections: Vec<Mutex<Vec<u32>>>,
}

impl NodeInner {
    pub fn new(vector: Vec<f32>, layer_max: usize) -> Self {
        let connections = (0..=layer_max).map(|_| Mutex::new(Vec::new())).collect();
        NodeInner {
            vector,
            layer_max,
            connections,
        }
    }

    pub fn neighbors(&self, layer: usize) -> Vec<u32> {
        self.connections[layer].lock().clone()
    }

    pub fn set_neighbors(&self, layer: usize, neighbors: Vec<u32>) {
        *self.connections[layer].lock() = neighbors;
    }

    pub fn push_neighbor(&self, layer: usize, id: u32) {
        self.connections[layer].lock().push(id);
    }

    pub fn layer_count(&self) -> usize {
        self.layer_max + 1
    }
}
