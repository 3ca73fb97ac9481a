use crate::{
    error::{AppError, AppResult},
    models::Centroid,
};

/// Lloyd's k-means over `points` with `k` clusters and at most `max_iter` iterations.
///
/// Initial centroids are spread evenly over the input order, so identical
/// input gives identical output. Clusters that lose every member keep their
/// previous centroid and report a zero member count.
pub fn kmeans(points: &[Vec<f32>], k: usize, max_iter: usize) -> AppResult<Vec<Centroid>> {
    if points.is_empty() {
        return Err(AppError::Clustering("no points to cluster".to_string()));
    }
    if k == 0 {
        return Err(AppError::Clustering("cluster count must be positive".to_string()));
    }
    let dims = points[0].len();
    if dims == 0 || points.iter().any(|p| p.len() != dims) {
        return Err(AppError::Clustering(
            "points must share a non-zero dimension".to_string(),
        ));
    }

    let n = points.len();
    let k = k.min(n);
    let mut centroids: Vec<Vec<f32>> = (0..k).map(|i| points[i * n / k].clone()).collect();
    let mut assignments = vec![usize::MAX; n];

    for iteration in 0..max_iter.max(1) {
        let mut changed = false;
        for (point, assignment) in points.iter().zip(assignments.iter_mut()) {
            let nearest = nearest_centroid(point, &centroids);
            if *assignment != nearest {
                *assignment = nearest;
                changed = true;
            }
        }

        if !changed {
            tracing::trace!(iteration, "k-means converged");
            break;
        }

        let mut sums = vec![vec![0.0f64; dims]; k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in points.iter().zip(&assignments) {
            counts[cluster] += 1;
            for (sum, value) in sums[cluster].iter_mut().zip(point) {
                *sum += f64::from(*value);
            }
        }
        for ((centroid, sum), &count) in centroids.iter_mut().zip(&sums).zip(&counts) {
            if count > 0 {
                for (c, s) in centroid.iter_mut().zip(sum) {
                    *c = (s / count as f64) as f32;
                }
            }
        }
    }

    let mut counts = vec![0usize; k];
    for &cluster in &assignments {
        counts[cluster] += 1;
    }

    Ok(centroids
        .into_iter()
        .zip(counts)
        .map(|(vector, member_count)| Centroid {
            vector,
            member_count,
        })
        .collect())
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (index, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
