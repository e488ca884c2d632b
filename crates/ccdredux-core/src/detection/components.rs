use std::collections::BTreeMap;

use ndarray::Array2;

/// One connected blob of above-threshold pixels.
#[derive(Clone, Debug)]
pub struct Component {
    pub label: u32,
    /// Number of pixels in the component.
    pub area: usize,
    /// Bounding box: (min_row, max_row, min_col, max_col).
    pub bbox: (usize, usize, usize, usize),
    /// Brightest pixel value inside the component.
    pub peak: f32,
    /// Intensity-weighted centroid (row, col), weights are `value - background`.
    pub centroid: (f64, f64),
}

/// Label the `true` pixels of `mask` with 4-connectivity (two-pass union-find)
/// and measure each component on `values`.
///
/// Returns components in label order.
pub fn connected_components(
    mask: &Array2<bool>,
    values: &Array2<f32>,
    background: f32,
) -> Vec<Component> {
    let (h, w) = mask.dim();
    if h == 0 || w == 0 || values.dim() != (h, w) {
        return Vec::new();
    }

    let mut labels = Array2::<u32>::zeros((h, w));
    // Index 0 is the background label.
    let mut parent: Vec<u32> = vec![0];

    for row in 0..h {
        for col in 0..w {
            if !mask[[row, col]] {
                continue;
            }
            let up = if row > 0 { labels[[row - 1, col]] } else { 0 };
            let left = if col > 0 { labels[[row, col - 1]] } else { 0 };
            labels[[row, col]] = match (up, left) {
                (0, 0) => {
                    let next = parent.len() as u32;
                    parent.push(next);
                    next
                }
                (l, 0) | (0, l) => l,
                (a, b) => {
                    union(&mut parent, a, b);
                    a.min(b)
                }
            };
        }
    }

    #[derive(Default)]
    struct Acc {
        area: usize,
        bbox: Option<(usize, usize, usize, usize)>,
        peak: f32,
        wsum: f64,
        wr: f64,
        wc: f64,
        rsum: f64,
        csum: f64,
    }

    let mut accs = BTreeMap::<u32, Acc>::new();
    for ((row, col), &lbl) in labels.indexed_iter() {
        if lbl == 0 {
            continue;
        }
        let root = find(&parent, lbl);
        let v = values[[row, col]];
        let acc = accs.entry(root).or_insert_with(|| Acc {
            peak: f32::NEG_INFINITY,
            ..Acc::default()
        });
        acc.area += 1;
        acc.bbox = Some(match acc.bbox {
            None => (row, row, col, col),
            Some((r0, r1, c0, c1)) => (r0.min(row), r1.max(row), c0.min(col), c1.max(col)),
        });
        acc.peak = acc.peak.max(v);
        let weight = (v - background).max(0.0) as f64;
        acc.wsum += weight;
        acc.wr += weight * row as f64;
        acc.wc += weight * col as f64;
        acc.rsum += row as f64;
        acc.csum += col as f64;
    }

    accs.into_iter()
        .filter_map(|(label, acc)| {
            let bbox = acc.bbox?;
            let centroid = if acc.wsum > 0.0 {
                (acc.wr / acc.wsum, acc.wc / acc.wsum)
            } else {
                let n = acc.area as f64;
                (acc.rsum / n, acc.csum / n)
            };
            Some(Component {
                label,
                area: acc.area,
                bbox,
                peak: acc.peak,
                centroid,
            })
        })
        .collect()
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}
