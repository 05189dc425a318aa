// Type aliases for data values.
pub type Vertex2 = [f64; 2];
pub type Triangle2 = [Vertex2; 3];

// Type aliases for data indices.
pub type VertexIdx = usize;

// Type aliases for data structure indices.
// This is to know, when a function accepts or returns a usize, what it is for.
pub type TriIdx = usize;
pub type EdgeIdx = usize;
