//! k-nearest-neighbour similarity graph over standardized country profiles,
//! with community detection, two outlier methods and the
//! geography/profile divergence ranking.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::Serialize;

use super::catalog;
use super::community::{modularity, CommunityDetector, WeightedEdge};
use super::config::{AnalysisConfig, DbscanEps, DEFAULT_DBSCAN_EPS};
use super::error::{Analysis, AnalysisError};
use super::fusion::{FusedRow, FusedTable};
use super::matrix::{impute_median, select_columns, FeatureMatrix};
use super::stats;

pub const MIN_NODES: usize = 10;
/// Percentile of mean kNN distance above which a node is an outlier.
pub const KNN_OUTLIER_PERCENTILE: f64 = 90.0;
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub country: String,
    pub community: Option<usize>,
    pub mean_knn_distance: f64,
    pub knn_outlier: bool,
    /// DBSCAN cluster id; `None` is noise.
    pub dbscan_cluster: Option<usize>,
    pub dbscan_noise: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub distance: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Partition {
    pub algorithm: String,
    pub n_communities: usize,
    pub modularity: f64,
    pub members: BTreeMap<usize, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbscanSummary {
    pub eps: f64,
    pub eps_mode: String,
    pub min_samples: usize,
    pub n_clusters: usize,
    pub n_noise: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DivergentPair {
    pub country_a: String,
    pub country_b: String,
    pub feature_distance: f64,
    pub geographic_km: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityGraph {
    pub features: Vec<String>,
    pub k: usize,
    pub nodes: Vec<GraphNode>,
    /// Exactly `k` outgoing edges per node.
    pub knn_edges: Vec<GraphEdge>,
    /// Deduplicated undirected edges used for community detection.
    pub edges: Vec<GraphEdge>,
    pub partition: Analysis<Partition>,
    pub knn_distance_threshold: f64,
    pub dbscan: DbscanSummary,
    pub divergence: Analysis<Vec<DivergentPair>>,
}

impl SimilarityGraph {
    pub fn knn_outliers(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.knn_outlier)
            .map(|n| n.country.as_str())
            .collect()
    }

    pub fn dbscan_outliers(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.dbscan_noise)
            .map(|n| n.country.as_str())
            .collect()
    }
}

/// Edge weight, monotonically decreasing in distance and within (0, 1].
pub fn edge_weight(distance: f64) -> f64 {
    if distance.is_finite() {
        1.0 / (1.0 + distance.max(0.0))
    } else {
        f64::MIN_POSITIVE
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Full pairwise Euclidean distance matrix.
pub fn distance_matrix(points: &[Vec<f64>]) -> Vec<Vec<f64>> {
    points
        .par_iter()
        .map(|a| points.iter().map(|b| euclidean(a, b)).collect())
        .collect()
}

/// The `k` nearest other points of `i`, nearest first; ties go to the lower index.
pub fn nearest_neighbors(distances: &[Vec<f64>], i: usize, k: usize) -> Vec<usize> {
    let mut others: Vec<usize> = (0..distances.len()).filter(|&j| j != i).collect();
    others.sort_by(|&a, &b| {
        distances[i][a]
            .partial_cmp(&distances[i][b])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    others.truncate(k);
    others
}

/// DBSCAN labels: neighbourhoods include the point itself and a point is a
/// core point when its neighbourhood holds at least `min_samples` points.
pub fn dbscan(distances: &[Vec<f64>], eps: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = distances.len();
    let region = |i: usize| -> Vec<usize> { (0..n).filter(|&j| distances[i][j] <= eps).collect() };

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut cluster = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let neighbors = region(i);
        if neighbors.len() < min_samples {
            continue;
        }
        labels[i] = Some(cluster);
        let mut queue = neighbors;
        let mut q = 0;
        while q < queue.len() {
            let j = queue[q];
            q += 1;
            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            let expansion = region(j);
            if expansion.len() >= min_samples {
                for p in expansion {
                    if !queue.contains(&p) {
                        queue.push(p);
                    }
                }
            }
        }
        cluster += 1;
    }
    labels
}

/// Knee of the sorted k-distance curve: the point farthest below the chord
/// joining its ends.
pub fn knee_eps(distances: &[Vec<f64>], min_samples: usize) -> Option<f64> {
    let k = min_samples.saturating_sub(1).max(1);
    let mut kth: Vec<f64> = (0..distances.len())
        .filter_map(|i| {
            let nn = nearest_neighbors(distances, i, k);
            nn.last().map(|&j| distances[i][j])
        })
        .collect();
    if kth.len() < 3 {
        return None;
    }
    kth.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let n = kth.len();
    let (x0, y0) = (0.0, kth[0]);
    let (x1, y1) = ((n - 1) as f64, kth[n - 1]);
    let (dx, dy) = (x1 - x0, y1 - y0);
    let norm = (dx * dx + dy * dy).sqrt();
    if norm <= f64::EPSILON || dy <= f64::EPSILON {
        return kth.iter().copied().find(|d| *d > 0.0);
    }
    let (best, _) = kth
        .iter()
        .enumerate()
        .map(|(i, &y)| (i, (dy * i as f64 - dx * (y - y0)) / norm))
        .fold((0, f64::NEG_INFINITY), |acc, (i, d)| if d > acc.1 { (i, d) } else { acc });
    Some(kth[best]).filter(|e| *e > 0.0)
}

/// Great-circle distance in km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Candidate profile features: the core pollutants, then socio-economic indicators.
pub fn candidate_features(table: &FusedTable) -> Vec<String> {
    let mut features: Vec<String> = catalog::POLLUTANTS
        .iter()
        .take(3)
        .map(|p| catalog::pollutant_column(p))
        .filter(|c| table.has_column(c))
        .collect();
    features.extend(
        catalog::SIMILARITY_SOCIOECONOMIC
            .iter()
            .filter(|c| table.has_column(c))
            .map(|c| c.to_string()),
    );
    features
}

/// Nodes: eligible rows with both core pollutants present.
pub fn node_rows<'a>(table: &'a FusedTable, min_quality: u8) -> Vec<&'a FusedRow> {
    let core: Vec<String> = catalog::POLLUTANTS
        .iter()
        .take(2)
        .map(|p| catalog::pollutant_column(p))
        .collect();
    table
        .eligible_rows(min_quality)
        .into_iter()
        .filter(|r| core.iter().all(|c| r.number(c).is_some()))
        .collect()
}

/// Build the similarity graph and run every graph-based analysis.
///
/// `detector` of `None` degrades to "no partition" instead of failing.
pub fn build_similarity_graph(
    table: &FusedTable,
    config: &AnalysisConfig,
    detector: Option<&dyn CommunityDetector>,
) -> Analysis<SimilarityGraph> {
    build(table, config, detector).into()
}

fn build(
    table: &FusedTable,
    config: &AnalysisConfig,
    detector: Option<&dyn CommunityDetector>,
) -> Result<SimilarityGraph, AnalysisError> {
    let rows = node_rows(table, config.min_quality);
    if rows.len() < MIN_NODES {
        return Err(AnalysisError::insufficient(format!(
            "only {} countries with both core pollutants (need {})",
            rows.len(),
            MIN_NODES
        )));
    }
    let (features, _) = select_columns(&rows, &candidate_features(table), 1);
    let matrix = FeatureMatrix::standardized(&rows, &features)?;
    if matrix.n_cols() == 0 {
        return Err(AnalysisError::degenerate("similarity profile", "every feature is constant"));
    }

    let n = matrix.n_rows();
    let k = config.knn_k.min(n - 1).max(1);
    let distances = distance_matrix(&matrix.data);
    let keys = &matrix.row_keys;

    let neighbors: Vec<Vec<usize>> = (0..n).map(|i| nearest_neighbors(&distances, i, k)).collect();

    let mut knn_edges = Vec::with_capacity(n * k);
    let mut undirected: BTreeSet<(usize, usize)> = BTreeSet::new();
    for (i, nn) in neighbors.iter().enumerate() {
        for &j in nn {
            knn_edges.push(GraphEdge {
                source: keys[i].clone(),
                target: keys[j].clone(),
                distance: distances[i][j],
                weight: edge_weight(distances[i][j]),
            });
            undirected.insert((i.min(j), i.max(j)));
        }
    }
    let weighted: Vec<WeightedEdge> = undirected
        .iter()
        .map(|&(a, b)| (a, b, edge_weight(distances[a][b])))
        .collect();
    let edges: Vec<GraphEdge> = weighted
        .iter()
        .map(|&(a, b, w)| GraphEdge {
            source: keys[a].clone(),
            target: keys[b].clone(),
            distance: distances[a][b],
            weight: w,
        })
        .collect();

    let partition_labels: Result<(Vec<usize>, &'static str), AnalysisError> = match detector {
        Some(d) => d.detect(n, &weighted).map(|labels| (labels, d.name())),
        None => Err(AnalysisError::MissingDependency(
            "community detection is disabled; graph reported without a partition".to_string(),
        )),
    };
    let partition: Analysis<Partition> = partition_labels
        .as_ref()
        .map_err(Clone::clone)
        .map(|(labels, name)| {
            let mut members: BTreeMap<usize, Vec<String>> = BTreeMap::new();
            for (i, &c) in labels.iter().enumerate() {
                members.entry(c).or_default().push(keys[i].clone());
            }
            Partition {
                algorithm: name.to_string(),
                n_communities: members.len(),
                modularity: modularity(n, &weighted, labels),
                members,
            }
        })
        .into();

    let mean_knn: Vec<f64> = neighbors
        .iter()
        .enumerate()
        .map(|(i, nn)| nn.iter().map(|&j| distances[i][j]).sum::<f64>() / nn.len() as f64)
        .collect();
    let threshold = stats::percentile(&mean_knn, KNN_OUTLIER_PERCENTILE).unwrap_or(f64::INFINITY);

    let (eps, eps_mode) = match config.dbscan_eps {
        DbscanEps::Fixed(eps) => (eps, "fixed"),
        DbscanEps::Auto => match knee_eps(&distances, config.dbscan_min_samples) {
            Some(eps) => (eps, "auto"),
            None => (DEFAULT_DBSCAN_EPS, "fixed (knee undefined)"),
        },
    };
    let clusters = dbscan(&distances, eps, config.dbscan_min_samples);
    let n_clusters = clusters.iter().flatten().collect::<BTreeSet<_>>().len();

    let communities = partition_labels.ok().map(|(labels, _)| labels);
    let nodes: Vec<GraphNode> = (0..n)
        .map(|i| GraphNode {
            country: keys[i].clone(),
            community: communities.as_ref().map(|c| c[i]),
            mean_knn_distance: mean_knn[i],
            knn_outlier: mean_knn[i] > threshold,
            dbscan_cluster: clusters[i],
            dbscan_noise: clusters[i].is_none(),
        })
        .collect();

    let divergence = geography_divergence(&rows, &distances, config.top_divergent_pairs).into();

    Ok(SimilarityGraph {
        features: matrix.columns.clone(),
        k,
        knn_edges,
        edges,
        partition,
        knn_distance_threshold: threshold,
        dbscan: DbscanSummary {
            eps,
            eps_mode: eps_mode.to_string(),
            min_samples: config.dbscan_min_samples,
            n_clusters,
            n_noise: nodes.iter().filter(|n| n.dbscan_noise).count(),
        },
        nodes,
        divergence,
    })
}

/// Pairs close in profile but far apart on the map:
/// score = (1 - normalized feature distance) x normalized geographic distance.
pub fn geography_divergence(
    rows: &[&FusedRow],
    feature_distances: &[Vec<f64>],
    top_n: usize,
) -> Result<Vec<DivergentPair>, AnalysisError> {
    let coordinates = [catalog::LATITUDE.to_string(), catalog::LONGITUDE.to_string()];
    let (coords, _) = impute_median(rows, &coordinates).map_err(|_| {
        AnalysisError::insufficient("no mean latitude/longitude available for graph nodes")
    })?;

    let n = rows.len();
    let pairs: Vec<(usize, usize, f64, f64)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .map(|(i, j)| {
            let geo = haversine_km(coords[i][0], coords[i][1], coords[j][0], coords[j][1]);
            (i, j, feature_distances[i][j], geo)
        })
        .collect();

    let feature: Vec<f64> = pairs.iter().map(|p| p.2).collect();
    let geo: Vec<f64> = pairs.iter().map(|p| p.3).collect();
    let (f_min, f_max) = stats::min_max(&feature)
        .ok_or_else(|| AnalysisError::degenerate("feature distance", "all pairs equidistant"))?;
    let (g_min, g_max) = stats::min_max(&geo)
        .ok_or_else(|| AnalysisError::degenerate("geographic distance", "all pairs equidistant"))?;

    let mut scored: Vec<DivergentPair> = pairs
        .into_iter()
        .map(|(i, j, f, g)| {
            let nf = (f - f_min) / (f_max - f_min);
            let ng = (g - g_min) / (g_max - g_min);
            DivergentPair {
                country_a: rows[i].key().to_string(),
                country_b: rows[j].key().to_string(),
                feature_distance: f,
                geographic_km: g,
                score: (1.0 - nf) * ng,
            }
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(top_n);
    Ok(scored)
}
