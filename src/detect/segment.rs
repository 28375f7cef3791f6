//! Significance thresholding and connected-component labeling.
//!
//! Two-pass labeling with a union-find equivalence table. Regions use
//! 8-connectivity: diagonal neighbors belong to the same region, but a
//! background gap is never bridged.

use ndarray::{Array2, ArrayView2};

/// Find the root label, compressing the path as it walks.
fn find_root(parents: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != parents[current] {
        parents[current] = parents[parents[current]];
        current = parents[current];
    }
    current
}

/// Merge two labels; the smaller root becomes the parent.
fn union_labels(parents: &mut [usize], label1: usize, label2: usize) {
    let root1 = find_root(parents, label1);
    let root2 = find_root(parents, label2);
    if root1 != root2 {
        if root1 < root2 {
            parents[root2] = root1;
        } else {
            parents[root1] = root2;
        }
    }
}

/// Label 8-connected regions of pixels whose significance meets `threshold`.
///
/// Returns the label image (0 = background, regions numbered consecutively
/// from 1) and the number of regions.
pub fn label_regions(significance: &ArrayView2<f64>, threshold: f64) -> (Array2<usize>, usize) {
    let (rows, cols) = significance.dim();
    let mut labels = Array2::<usize>::zeros((rows, cols));
    let mut parents = vec![0usize];
    let mut label_count = 0usize;

    for r in 0..rows {
        for c in 0..cols {
            if significance[[r, c]] < threshold {
                continue;
            }

            // Previously visited 8-neighbors: west, and the three above.
            let mut neighbor_labels = [0usize; 4];
            let mut n = 0;
            if c > 0 && labels[[r, c - 1]] > 0 {
                neighbor_labels[n] = labels[[r, c - 1]];
                n += 1;
            }
            if r > 0 {
                if c > 0 && labels[[r - 1, c - 1]] > 0 {
                    neighbor_labels[n] = labels[[r - 1, c - 1]];
                    n += 1;
                }
                if labels[[r - 1, c]] > 0 {
                    neighbor_labels[n] = labels[[r - 1, c]];
                    n += 1;
                }
                if c + 1 < cols && labels[[r - 1, c + 1]] > 0 {
                    neighbor_labels[n] = labels[[r - 1, c + 1]];
                    n += 1;
                }
            }

            if n == 0 {
                label_count += 1;
                labels[[r, c]] = label_count;
                parents.push(label_count);
            } else {
                let min_label = *neighbor_labels[..n].iter().min().unwrap();
                labels[[r, c]] = min_label;
                for &neighbor in &neighbor_labels[..n] {
                    if neighbor != min_label {
                        union_labels(&mut parents, min_label, neighbor);
                    }
                }
            }
        }
    }

    // Flatten equivalences, then renumber roots consecutively.
    for i in 1..parents.len() {
        find_root(&mut parents, i);
    }
    let mut relabel = vec![0usize; parents.len()];
    let mut next = 0usize;
    for i in 1..parents.len() {
        let root = parents[i];
        if relabel[root] == 0 {
            next += 1;
            relabel[root] = next;
        }
        relabel[i] = relabel[root];
    }

    for value in labels.iter_mut() {
        if *value > 0 {
            *value = relabel[*value];
        }
    }

    (labels, next)
}

/// Pixel membership lists for each region, in label order.
pub fn region_pixels(labels: &ArrayView2<usize>, n_regions: usize) -> Vec<Vec<(usize, usize)>> {
    let mut regions = vec![Vec::new(); n_regions];
    for ((r, c), &label) in labels.indexed_iter() {
        if label > 0 {
            regions[label - 1].push((r, c));
        }
    }
    regions
}
