//! Incremental cluster-merging engine
//!
//! The engine receives primitive clusters (single points, distance pairs,
//! angle hedgehogs, fix clusters) and incrementally rewrites the top level
//! of its merge forest: whenever a rule recognizes that a set of top-level
//! clusters determines a larger rigid, a merge method consumes them and a
//! derived cluster takes their place. Methods are structural - they are
//! found from cluster shapes alone - while configurations flow through the
//! method list on every `set`, in creation order (which is topological by
//! construction).
//!
//! The merge forest, the solution lists and the root designation are owned
//! here; callers keep only [`ClusterId`] handles.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::configuration::{Configuration, SelectionRule, Solution};
use crate::cluster::merge::{align_onto, congruent_on, place_sas, solve_triangle};
use crate::cluster::primitive::{Cluster, ClusterId, ClusterShape};
use crate::core::math::{angle_at, distance, orientation, Position, Var};
use crate::core::precision::tol_eq;

/// Unique identifier for a merge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId(Uuid);

impl MethodId {
    /// Create a new unique method ID
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MethodId {
    fn default() -> Self {
        Self::new()
    }
}

/// The rewrite rule a merge method applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    /// A single-point rigid absorbed by a rigid that covers its variable.
    PointMerge,
    /// Two rigids joined over enough shared variables to fix their motion.
    PairMerge,
    /// A hedgehog inside a rigid, acting as an angle consistency filter.
    HogFilter,
    /// Three rigids pairwise sharing one variable, solved as a triangle.
    DistanceTriangle,
    /// A hedgehog and two rigids meeting at its center, solved by SAS.
    AngleTriangle,
    /// Prototype-based selection between chirality variants.
    PrototypeSelect,
}

/// A node of the merge forest: inputs consumed, one output produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeMethod {
    id: MethodId,
    kind: MethodKind,
    inputs: Vec<ClusterId>,
    output: ClusterId,
}

impl MergeMethod {
    /// The rewrite rule this method applies.
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Clusters consumed by the method.
    pub fn inputs(&self) -> &[ClusterId] {
        &self.inputs
    }

    /// Clusters produced by the method (always exactly one).
    pub fn outputs(&self) -> Vec<ClusterId> {
        vec![self.output]
    }

    /// The produced cluster.
    pub fn output(&self) -> ClusterId {
        self.output
    }

    /// Whether this is a prototype-based selection method.
    pub fn is_prototype(&self) -> bool {
        self.kind == MethodKind::PrototypeSelect
    }
}

/// Change notifications emitted by the engine.
///
/// The geometric solver ignores these; they exist for auxiliary observers
/// (debug views, tracing). Kept on a bounded ring so an observer-free
/// deployment cannot grow without bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A cluster (primitive or derived) entered the forest.
    Added(ClusterId),
    /// A cluster left the forest.
    Removed(ClusterId),
    /// A cluster received new configurations.
    ConfigurationsSet(ClusterId),
    /// A cluster was designated as the root.
    RootSet(ClusterId),
}

const EVENT_CAPACITY: usize = 256;

/// A merge rule instance found by the structural search.
struct Application {
    kind: MethodKind,
    inputs: Vec<ClusterId>,
}

/// The incremental cluster-merging solver.
pub struct ClusterSolver {
    dimension: usize,
    clusters: HashMap<ClusterId, Cluster>,
    /// Insertion order; drives deterministic rule search and display.
    order: Vec<ClusterId>,
    /// Solution lists; a missing entry means "not yet solved".
    solutions: HashMap<ClusterId, Vec<Solution>>,
    methods: Vec<MergeMethod>,
    consumer: HashMap<ClusterId, MethodId>,
    producer: HashMap<ClusterId, MethodId>,
    root: Option<ClusterId>,
    selections: Vec<(Uuid, Arc<dyn SelectionRule>)>,
    events: VecDeque<EngineEvent>,
}

impl fmt::Debug for ClusterSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterSolver")
            .field("dimension", &self.dimension)
            .field("clusters", &self.order.len())
            .field("methods", &self.methods.len())
            .field("root", &self.root)
            .finish()
    }
}

impl ClusterSolver {
    /// Create an engine for problems of the given dimension (2 or 3).
    pub fn new(dimension: usize) -> Self {
        ClusterSolver {
            dimension,
            clusters: HashMap::new(),
            order: Vec::new(),
            solutions: HashMap::new(),
            methods: Vec::new(),
            consumer: HashMap::new(),
            producer: HashMap::new(),
            root: None,
            selections: Vec::new(),
            events: VecDeque::new(),
        }
    }

    /// The problem dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Add a primitive cluster and rewrite the top level.
    pub fn add(&mut self, cluster: Cluster) -> ClusterId {
        let id = cluster.id;
        debug!("engine: add {}", cluster);
        self.clusters.insert(id, cluster);
        self.order.push(id);
        self.push_event(EngineEvent::Added(id));
        self.search();
        self.recompute_all();
        id
    }

    /// Remove a cluster; every method depending on it dies with its output,
    /// freed inputs rejoin the top level and the rewrite search reruns.
    pub fn remove(&mut self, id: ClusterId) {
        if !self.clusters.contains_key(&id) {
            return;
        }
        debug!("engine: remove {}", id);
        let mut dead_clusters: HashSet<ClusterId> = HashSet::new();
        dead_clusters.insert(id);
        let mut dead_methods: HashSet<MethodId> = HashSet::new();
        loop {
            let mut changed = false;
            for m in &self.methods {
                if dead_methods.contains(&m.id) {
                    continue;
                }
                if dead_clusters.contains(&m.output)
                    || m.inputs.iter().any(|i| dead_clusters.contains(i))
                {
                    dead_methods.insert(m.id);
                    dead_clusters.insert(m.output);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        self.methods.retain(|m| !dead_methods.contains(&m.id));
        self.order.retain(|c| !dead_clusters.contains(c));
        for c in &dead_clusters {
            self.clusters.remove(c);
            self.solutions.remove(c);
            self.producer.remove(c);
            self.consumer.remove(c);
            self.push_event(EngineEvent::Removed(*c));
        }
        self.consumer.retain(|_, mid| !dead_methods.contains(mid));
        if self.root.map_or(false, |r| dead_clusters.contains(&r)) {
            self.root = None;
        }
        self.search();
        self.recompute_all();
    }

    /// Seed the solution list of a cluster and repropagate the forest.
    pub fn set(&mut self, id: ClusterId, configurations: Vec<Configuration>) {
        if !self.clusters.contains_key(&id) {
            log::warn!("engine: set on unknown cluster {}", id);
            return;
        }
        self.solutions.insert(
            id,
            configurations.into_iter().map(Solution::determined).collect(),
        );
        self.push_event(EngineEvent::ConfigurationsSet(id));
        self.recompute_all();
    }

    /// Solution list of a cluster; `None` when not yet solved.
    pub fn get(&self, id: ClusterId) -> Option<&[Solution]> {
        self.solutions.get(&id).map(Vec::as_slice)
    }

    /// Designate the anchor cluster for absolute positioning.
    ///
    /// Merges touching the root (or a cluster derived from it) keep the
    /// root's coordinate frame. Takes effect on the next propagation, so
    /// calling it right after `add` anchors correctly.
    pub fn set_root(&mut self, id: ClusterId) {
        if !self.clusters.contains_key(&id) {
            log::warn!("engine: set_root on unknown cluster {}", id);
            return;
        }
        self.root = Some(id);
        self.push_event(EngineEvent::RootSet(id));
        self.recompute_all();
    }

    /// The current root cluster, if any.
    pub fn root(&self) -> Option<ClusterId> {
        self.root
    }

    /// Clusters with no parent in the merge forest, in insertion order.
    pub fn top_level(&self) -> Vec<&Cluster> {
        self.order
            .iter()
            .filter(|id| !self.consumer.contains_key(id))
            .map(|id| &self.clusters[id])
            .collect()
    }

    /// All rigid clusters currently tracked, primitive and derived.
    pub fn rigids(&self) -> Vec<&Cluster> {
        self.order
            .iter()
            .map(|id| &self.clusters[id])
            .filter(|c| c.is_rigid())
            .collect()
    }

    /// The merge methods, in creation order.
    pub fn methods(&self) -> &[MergeMethod] {
        &self.methods
    }

    /// Look up a cluster by id.
    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    /// Register a selection rule; derived clusters covering all of the
    /// rule's variables only keep configurations the rule accepts.
    pub fn add_selection(&mut self, key: Uuid, rule: Arc<dyn SelectionRule>) {
        self.selections.push((key, rule));
        self.recompute_all();
    }

    /// Drop a previously registered selection rule.
    pub fn rem_selection(&mut self, key: &Uuid) {
        self.selections.retain(|(k, _)| k != key);
        self.recompute_all();
    }

    /// Drain pending change notifications.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    // ========================================================================
    // Structural search
    // ========================================================================

    fn c(&self, id: ClusterId) -> &Cluster {
        &self.clusters[&id]
    }

    fn shared(&self, a: ClusterId, b: ClusterId) -> BTreeSet<Var> {
        self.c(a).vars().intersection(&self.c(b).vars()).cloned().collect()
    }

    fn top_level_ids(&self) -> Vec<ClusterId> {
        self.order
            .iter()
            .filter(|id| !self.consumer.contains_key(id))
            .copied()
            .collect()
    }

    fn search(&mut self) {
        loop {
            let top = self.top_level_ids();
            let found = self
                .find_point_merge(&top)
                .or_else(|| self.find_subset_merge(&top))
                .or_else(|| self.find_hog_filter(&top))
                .or_else(|| self.find_pair_merge(&top))
                .or_else(|| self.find_distance_triangle(&top))
                .or_else(|| self.find_angle_triangle(&top));
            match found {
                Some(app) => self.apply(app),
                None => break,
            }
        }
    }

    fn find_point_merge(&self, top: &[ClusterId]) -> Option<Application> {
        for &p in top {
            let pc = self.c(p);
            if !pc.is_rigid() || pc.var_count() != 1 {
                continue;
            }
            let var = pc.vars().into_iter().next().expect("singleton has a var");
            for &r in top {
                let rc = self.c(r);
                if r != p && rc.is_rigid() && rc.var_count() > 1 && rc.contains(&var) {
                    return Some(Application {
                        kind: MethodKind::PointMerge,
                        inputs: vec![p, r],
                    });
                }
            }
        }
        None
    }

    fn find_subset_merge(&self, top: &[ClusterId]) -> Option<Application> {
        for &big in top {
            let bc = self.c(big);
            if !bc.is_rigid() || bc.var_count() < 2 {
                continue;
            }
            for &small in top {
                let sc = self.c(small);
                if small == big || !sc.is_rigid() || sc.var_count() < 2 {
                    continue;
                }
                if sc.vars().is_subset(&bc.vars()) {
                    return Some(Application {
                        kind: MethodKind::PairMerge,
                        inputs: vec![big, small],
                    });
                }
            }
        }
        None
    }

    fn find_hog_filter(&self, top: &[ClusterId]) -> Option<Application> {
        for &h in top {
            if self.c(h).is_rigid() {
                continue;
            }
            for &r in top {
                let rc = self.c(r);
                if rc.is_rigid() && self.c(h).vars().is_subset(&rc.vars()) {
                    return Some(Application {
                        kind: MethodKind::HogFilter,
                        inputs: vec![r, h],
                    });
                }
            }
        }
        None
    }

    fn find_pair_merge(&self, top: &[ClusterId]) -> Option<Application> {
        for (i, &a) in top.iter().enumerate() {
            let ac = self.c(a);
            if !ac.is_rigid() || ac.var_count() < 2 {
                continue;
            }
            for &b in &top[i + 1..] {
                let bc = self.c(b);
                if !bc.is_rigid() || bc.var_count() < 2 {
                    continue;
                }
                if self.shared(a, b).len() >= self.dimension {
                    return Some(Application {
                        kind: MethodKind::PairMerge,
                        inputs: vec![a, b],
                    });
                }
            }
        }
        None
    }

    fn triangle_candidate(&self, id: ClusterId) -> bool {
        let c = self.c(id);
        c.is_rigid() && c.var_count() >= 2 && (self.dimension == 2 || c.var_count() == 2)
    }

    fn find_distance_triangle(&self, top: &[ClusterId]) -> Option<Application> {
        for (i, &a) in top.iter().enumerate() {
            if !self.triangle_candidate(a) {
                continue;
            }
            for (j, &b) in top.iter().enumerate().skip(i + 1) {
                if !self.triangle_candidate(b) || self.shared(a, b).len() != 1 {
                    continue;
                }
                for &c in &top[j + 1..] {
                    if !self.triangle_candidate(c)
                        || self.shared(b, c).len() != 1
                        || self.shared(c, a).len() != 1
                    {
                        continue;
                    }
                    let p = self.shared(a, b).into_iter().next().expect("shared var");
                    let q = self.shared(b, c).into_iter().next().expect("shared var");
                    let r = self.shared(c, a).into_iter().next().expect("shared var");
                    if p != q && q != r && r != p {
                        return Some(Application {
                            kind: MethodKind::DistanceTriangle,
                            inputs: vec![a, b, c],
                        });
                    }
                }
            }
        }
        None
    }

    fn find_angle_triangle(&self, top: &[ClusterId]) -> Option<Application> {
        for &h in top {
            let (center, spokes) = match &self.c(h).shape {
                ClusterShape::Hedgehog { center, spokes } if spokes.len() == 2 => {
                    (center.clone(), spokes.iter().cloned().collect::<Vec<_>>())
                }
                _ => continue,
            };
            let (sx, sy) = (&spokes[0], &spokes[1]);
            for &r1 in top {
                let c1 = self.c(r1);
                if !self.triangle_candidate(r1) || !c1.contains(&center) || !c1.contains(sx) || c1.contains(sy)
                {
                    continue;
                }
                for &r2 in top {
                    let c2 = self.c(r2);
                    if r2 == r1
                        || !self.triangle_candidate(r2)
                        || !c2.contains(&center)
                        || !c2.contains(sy)
                        || c2.contains(sx)
                    {
                        continue;
                    }
                    if self.shared(r1, r2).len() == 1 {
                        return Some(Application {
                            kind: MethodKind::AngleTriangle,
                            inputs: vec![h, r1, r2],
                        });
                    }
                }
            }
        }
        None
    }

    fn apply(&mut self, app: Application) {
        let union: BTreeSet<Var> = app
            .inputs
            .iter()
            .flat_map(|i| self.c(*i).vars())
            .collect();
        let redundant = match app.kind {
            MethodKind::HogFilter => true,
            MethodKind::PairMerge => {
                let v0 = self.c(app.inputs[0]).vars();
                let v1 = self.c(app.inputs[1]).vars();
                v0.is_subset(&v1) || v1.is_subset(&v0)
            }
            _ => false,
        };
        let overconstrained =
            redundant || app.inputs.iter().any(|i| self.c(*i).overconstrained);
        let out_id = self.create_derived(union.clone(), overconstrained);
        debug!(
            "engine: {:?} over {} inputs -> {}",
            app.kind,
            app.inputs.len(),
            self.c(out_id)
        );
        let method = MergeMethod {
            id: MethodId::new(),
            kind: app.kind,
            inputs: app.inputs,
            output: out_id,
        };
        self.wire(method);
        // reflection ambiguity of a distance triangle is resolved against
        // the prototype; only 2D has two chiralities to choose between
        if self.dimension == 2
            && self
                .methods
                .last()
                .map_or(false, |m| m.kind == MethodKind::DistanceTriangle)
        {
            let selected = self.create_derived(union, overconstrained);
            let method = MergeMethod {
                id: MethodId::new(),
                kind: MethodKind::PrototypeSelect,
                inputs: vec![out_id],
                output: selected,
            };
            self.wire(method);
        }
    }

    fn create_derived(&mut self, vars: BTreeSet<Var>, overconstrained: bool) -> ClusterId {
        let mut cluster = Cluster::rigid(vars);
        cluster.overconstrained = overconstrained;
        let id = cluster.id;
        self.clusters.insert(id, cluster);
        self.order.push(id);
        self.push_event(EngineEvent::Added(id));
        id
    }

    fn wire(&mut self, method: MergeMethod) {
        for input in &method.inputs {
            self.consumer.insert(*input, method.id);
        }
        self.producer.insert(method.output, method.id);
        self.methods.push(method);
    }

    // ========================================================================
    // Configuration propagation
    // ========================================================================

    fn recompute_all(&mut self) {
        for i in 0..self.methods.len() {
            let output = self.methods[i].output;
            match self.compute_method(i) {
                Some(solutions) => {
                    let filtered = self.apply_selections(output, solutions);
                    self.solutions.insert(output, filtered);
                }
                None => {
                    self.solutions.remove(&output);
                }
            }
        }
    }

    fn apply_selections(&self, cluster: ClusterId, solutions: Vec<Solution>) -> Vec<Solution> {
        if self.selections.is_empty() {
            return solutions;
        }
        let vars = self.c(cluster).vars();
        solutions
            .into_iter()
            .filter(|s| {
                self.selections.iter().all(|(_, rule)| {
                    let applicable = rule.variables().iter().all(|v| vars.contains(v));
                    !applicable || rule.test(&s.configuration)
                })
            })
            .collect()
    }

    fn compute_method(&self, index: usize) -> Option<Vec<Solution>> {
        let method = &self.methods[index];
        match method.kind {
            MethodKind::PointMerge => self.compute_point_merge(method),
            MethodKind::PairMerge => self.compute_pair_merge(method),
            MethodKind::HogFilter => self.compute_hog_filter(method),
            MethodKind::DistanceTriangle => self.compute_distance_triangle(method),
            MethodKind::AngleTriangle => self.compute_angle_triangle(method),
            MethodKind::PrototypeSelect => self.compute_prototype_select(method),
        }
    }

    fn compute_point_merge(&self, method: &MergeMethod) -> Option<Vec<Solution>> {
        let rigid = method
            .inputs
            .iter()
            .find(|i| self.c(**i).var_count() > 1)
            .expect("point merge has a rigid input");
        Some(self.solutions.get(rigid)?.clone())
    }

    fn compute_pair_merge(&self, method: &MergeMethod) -> Option<Vec<Solution>> {
        let (i0, i1) = (method.inputs[0], method.inputs[1]);
        // the anchored side keeps its frame; absolute coordinates win
        let (base, moving) = if self.is_anchored(i1) && !self.is_anchored(i0) {
            (i1, i0)
        } else {
            (i0, i1)
        };
        let anchors: Vec<Var> = self.shared(base, moving).into_iter().collect();
        let redundant = self.c(moving).vars().is_subset(&self.c(base).vars());
        let base_sols = self.solutions.get(&base)?;
        let moving_sols = self.solutions.get(&moving)?;
        let mut out: Vec<Solution> = Vec::new();
        for b in base_sols {
            for m in moving_sols {
                let merged = if redundant {
                    // no new positions, just a consistency requirement
                    congruent_on(&b.configuration, &m.configuration, &anchors)
                        .then(|| b.configuration.clone())
                } else {
                    align_onto(&b.configuration, &m.configuration, &anchors, self.dimension)
                };
                if let Some(configuration) = merged {
                    push_unique(
                        &mut out,
                        configuration,
                        b.underconstrained || m.underconstrained,
                    );
                }
            }
        }
        Some(out)
    }

    fn compute_hog_filter(&self, method: &MergeMethod) -> Option<Vec<Solution>> {
        let (rigid, hog) = (method.inputs[0], method.inputs[1]);
        let (center, spokes) = match &self.c(hog).shape {
            ClusterShape::Hedgehog { center, spokes } => {
                (center.clone(), spokes.iter().cloned().collect::<Vec<_>>())
            }
            ClusterShape::Rigid { .. } => return None,
        };
        let rigid_sols = self.solutions.get(&rigid)?;
        let hog_sols = self.solutions.get(&hog)?;
        let mut out: Vec<Solution> = Vec::new();
        for rs in rigid_sols {
            for hs in hog_sols {
                if self.spoke_angles_agree(&hs.configuration, &rs.configuration, &center, &spokes) {
                    push_unique(
                        &mut out,
                        rs.configuration.clone(),
                        rs.underconstrained || hs.underconstrained,
                    );
                    break;
                }
            }
        }
        Some(out)
    }

    fn spoke_angles_agree(
        &self,
        hog: &Configuration,
        rigid: &Configuration,
        center: &Var,
        spokes: &[Var],
    ) -> bool {
        for (i, si) in spokes.iter().enumerate() {
            for sj in &spokes[i + 1..] {
                let measured = (|| {
                    let a = angle_at(hog.position(si)?, hog.position(center)?, hog.position(sj)?)?;
                    let b =
                        angle_at(rigid.position(si)?, rigid.position(center)?, rigid.position(sj)?)?;
                    Some((a, b))
                })();
                match measured {
                    Some((a, b)) if tol_eq(a, b) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    fn compute_distance_triangle(&self, method: &MergeMethod) -> Option<Vec<Solution>> {
        let (ia, ib, ic) = (method.inputs[0], method.inputs[1], method.inputs[2]);
        let p = self.shared(ia, ib).into_iter().next()?;
        let q = self.shared(ib, ic).into_iter().next()?;
        let r = self.shared(ic, ia).into_iter().next()?;
        let sols_a = self.solutions.get(&ia)?;
        let sols_b = self.solutions.get(&ib)?;
        let sols_c = self.solutions.get(&ic)?;
        let anchor_sets: [(ClusterId, [Var; 2]); 3] = [
            (ia, [p.clone(), r.clone()]),
            (ib, [p.clone(), q.clone()]),
            (ic, [q.clone(), r.clone()]),
        ];
        let mut out: Vec<Solution> = Vec::new();
        for sa in sols_a {
            for sb in sols_b {
                for sc in sols_c {
                    let combo = [sa, sb, sc];
                    let d_pq = match span(&sb.configuration, &p, &q) {
                        Some(d) => d,
                        None => continue,
                    };
                    let d_qr = match span(&sc.configuration, &q, &r) {
                        Some(d) => d,
                        None => continue,
                    };
                    let d_rp = match span(&sa.configuration, &r, &p) {
                        Some(d) => d,
                        None => continue,
                    };
                    let under = combo.iter().any(|s| s.underconstrained);
                    for (tp, tq, tr) in solve_triangle(d_pq, d_qr, d_rp, self.dimension) {
                        let base = Configuration::from_pairs([
                            (p.clone(), tp),
                            (q.clone(), tq),
                            (r.clone(), tr),
                        ]);
                        for configuration in self.assemble(base, &anchor_sets, &combo) {
                            push_unique(&mut out, configuration, under);
                        }
                    }
                }
            }
        }
        Some(out)
    }

    fn compute_angle_triangle(&self, method: &MergeMethod) -> Option<Vec<Solution>> {
        let (hog, r1, r2) = (method.inputs[0], method.inputs[1], method.inputs[2]);
        let (center, spokes) = match &self.c(hog).shape {
            ClusterShape::Hedgehog { center, spokes } => {
                (center.clone(), spokes.iter().cloned().collect::<Vec<_>>())
            }
            ClusterShape::Rigid { .. } => return None,
        };
        // r1 covers the first spoke, r2 the second (guaranteed by the search)
        let (sx, sy) = (spokes[0].clone(), spokes[1].clone());
        let hog_sols = self.solutions.get(&hog)?;
        let sols_1 = self.solutions.get(&r1)?;
        let sols_2 = self.solutions.get(&r2)?;
        let anchor_sets: [(ClusterId, [Var; 2]); 2] = [
            (r1, [center.clone(), sx.clone()]),
            (r2, [center.clone(), sy.clone()]),
        ];
        let mut out: Vec<Solution> = Vec::new();
        for hs in hog_sols {
            for s1 in sols_1 {
                for s2 in sols_2 {
                    let d1 = match span(&s1.configuration, &center, &sx) {
                        Some(d) => d,
                        None => continue,
                    };
                    let d2 = match span(&s2.configuration, &center, &sy) {
                        Some(d) => d,
                        None => continue,
                    };
                    let theta = match (
                        hs.configuration.position(&sx),
                        hs.configuration.position(&center),
                        hs.configuration.position(&sy),
                    ) {
                        (Some(a), Some(b), Some(c)) => match angle_at(a, b, c) {
                            Some(t) => t,
                            None => continue,
                        },
                        _ => continue,
                    };
                    let (pb, pa, pc) = place_sas(d1, d2, theta, self.dimension);
                    let base = Configuration::from_pairs([
                        (center.clone(), pb),
                        (sx.clone(), pa),
                        (sy.clone(), pc),
                    ]);
                    let combo = [s1, s2];
                    let under = hs.underconstrained
                        || combo.iter().any(|s| s.underconstrained);
                    for configuration in self.assemble(base, &anchor_sets, &combo) {
                        push_unique(&mut out, configuration, under);
                    }
                }
            }
        }
        Some(out)
    }

    /// Fold the input configurations of a triangle-style merge into the base
    /// placement and re-express the result in the frame of an anchored
    /// input. Chirality variants are never invented here: a rigid's own
    /// solution list already enumerates the chiralities it admits, and the
    /// anchor alignment is a proper rigid motion preserving each of them.
    fn assemble(
        &self,
        base: Configuration,
        anchor_sets: &[(ClusterId, [Var; 2])],
        combo: &[&Solution],
    ) -> Vec<Configuration> {
        let mut accs = vec![base];
        for (idx, (_, anchors)) in anchor_sets.iter().enumerate() {
            let input = &combo[idx].configuration;
            let mut next = Vec::new();
            for acc in &accs {
                if let Some(cfg) = align_onto(acc, input, anchors, self.dimension) {
                    if !next.contains(&cfg) {
                        next.push(cfg);
                    }
                }
            }
            accs = next;
            if accs.is_empty() {
                break;
            }
        }
        if let Some(aidx) = anchor_sets
            .iter()
            .position(|(cid, _)| self.is_anchored(*cid))
        {
            let frame = &combo[aidx].configuration;
            let anchor_vars: Vec<Var> = self.c(anchor_sets[aidx].0).vars().into_iter().collect();
            accs = accs
                .iter()
                .filter_map(|acc| align_onto(frame, acc, &anchor_vars, self.dimension))
                .collect();
        }
        accs
    }

    fn compute_prototype_select(&self, method: &MergeMethod) -> Option<Vec<Solution>> {
        let input = method.inputs[0];
        let sols = self.solutions.get(&input)?;
        if self.dimension != 2 {
            return Some(sols.clone());
        }
        let vars: Vec<Var> = self.c(method.output).vars().into_iter().collect();
        let prototypes: Option<Vec<&Position>> =
            vars.iter().map(|v| self.prototype_position(v)).collect();
        let prototypes = match prototypes {
            Some(p) => p,
            None => return Some(sols.clone()),
        };
        // first variable triple the prototype orients
        let mut chosen: Option<([usize; 3], i8)> = None;
        'outer: for i in 0..vars.len() {
            for j in i + 1..vars.len() {
                for k in j + 1..vars.len() {
                    let sign = orientation(&[prototypes[i], prototypes[j], prototypes[k]]);
                    if sign != 0 {
                        chosen = Some(([i, j, k], sign));
                        break 'outer;
                    }
                }
            }
        }
        let ([i, j, k], proto_sign) = match chosen {
            Some(c) => c,
            None => return Some(sols.clone()),
        };
        Some(
            sols.iter()
                .filter(|s| {
                    match (
                        s.configuration.position(&vars[i]),
                        s.configuration.position(&vars[j]),
                        s.configuration.position(&vars[k]),
                    ) {
                        (Some(a), Some(b), Some(c)) => {
                            let sign = orientation(&[a, b, c]);
                            sign == 0 || sign == proto_sign
                        }
                        _ => false,
                    }
                })
                .cloned()
                .collect(),
        )
    }

    /// Prototype position of a variable, read from its single-point rigid.
    fn prototype_position(&self, var: &str) -> Option<&Position> {
        let singleton = self.order.iter().find(|id| {
            let c = self.c(**id);
            c.is_rigid() && c.var_count() == 1 && c.contains(var)
        })?;
        self.solutions
            .get(singleton)?
            .first()?
            .configuration
            .position(var)
    }

    fn is_anchored(&self, id: ClusterId) -> bool {
        if self.root == Some(id) {
            return true;
        }
        match self.producer.get(&id) {
            Some(mid) => {
                let method = self
                    .methods
                    .iter()
                    .find(|m| m.id == *mid)
                    .expect("producer method exists");
                method.inputs.iter().any(|i| self.is_anchored(*i))
            }
            None => false,
        }
    }

    fn push_event(&mut self, event: EngineEvent) {
        if self.events.len() == EVENT_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

fn span(configuration: &Configuration, u: &str, v: &str) -> Option<f64> {
    Some(distance(
        configuration.position(u)?,
        configuration.position(v)?,
    ))
}

fn push_unique(out: &mut Vec<Solution>, configuration: Configuration, underconstrained: bool) {
    if !out.iter().any(|s| s.configuration == configuration) {
        out.push(Solution {
            configuration,
            underconstrained,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::point2;
    use crate::core::precision::tol_eq;
    use approx::assert_relative_eq;

    fn single(var: &str, x: f64, y: f64) -> (Cluster, Configuration) {
        (
            Cluster::rigid([var]),
            Configuration::from_pairs([(var.to_string(), point2(x, y))]),
        )
    }

    fn pair(a: &str, b: &str, d: f64) -> (Cluster, Configuration) {
        (
            Cluster::rigid([a, b]),
            Configuration::from_pairs([
                (a.to_string(), point2(0.0, 0.0)),
                (b.to_string(), point2(d, 0.0)),
            ]),
        )
    }

    fn seeded(engine: &mut ClusterSolver, cluster: Cluster, config: Configuration) -> ClusterId {
        let id = engine.add(cluster);
        engine.set(id, vec![config]);
        id
    }

    fn triangle_engine() -> (ClusterSolver, [ClusterId; 3]) {
        let mut engine = ClusterSolver::new(2);
        let (c, cfg) = single("A", 0.0, 0.0);
        let a = seeded(&mut engine, c, cfg);
        let (c, cfg) = single("B", 1.0, 0.0);
        let b = seeded(&mut engine, c, cfg);
        let (c, cfg) = single("C", 0.5, 1.0);
        let cc = seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("A", "B", 1.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("B", "C", 1.25f64.sqrt());
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("C", "A", 1.25f64.sqrt());
        seeded(&mut engine, c, cfg);
        (engine, [a, b, cc])
    }

    #[test]
    fn test_points_absorbed_into_distance_rigid() {
        let mut engine = ClusterSolver::new(2);
        let (c, cfg) = single("A", 0.0, 0.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = single("B", 3.0, 0.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("A", "B", 2.0);
        seeded(&mut engine, c, cfg);
        let top = engine.top_level();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].vars().len(), 2);
        let sols = engine.get(top[0].id).unwrap();
        assert_eq!(sols.len(), 1);
    }

    #[test]
    fn test_distance_triangle_merges_and_selects() {
        let (engine, _) = triangle_engine();
        let top = engine.top_level();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].vars().len(), 3);
        assert!(!top[0].overconstrained);
        // prototype selection keeps the chirality matching C above AB
        let sols = engine.get(top[0].id).unwrap();
        assert_eq!(sols.len(), 1);
        let cfg = &sols[0].configuration;
        let ab = distance(cfg.position("A").unwrap(), cfg.position("B").unwrap());
        let bc = distance(cfg.position("B").unwrap(), cfg.position("C").unwrap());
        assert!(tol_eq(ab, 1.0));
        assert!(tol_eq(bc, 1.25f64.sqrt()));
        // the unselected parent still carries both chiralities
        let prototype = engine
            .methods()
            .iter()
            .find(|m| m.is_prototype())
            .expect("prototype method");
        assert_eq!(engine.get(prototype.inputs()[0]).unwrap().len(), 2);
    }

    #[test]
    fn test_impossible_triangle_has_no_solutions() {
        let mut engine = ClusterSolver::new(2);
        for (v, x) in [("A", 0.0), ("B", 1.0), ("C", 2.0)] {
            let (c, cfg) = single(v, x, 0.0);
            seeded(&mut engine, c, cfg);
        }
        let (c, cfg) = pair("A", "B", 1.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("B", "C", 1.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("C", "A", 3.0);
        seeded(&mut engine, c, cfg);
        let top = engine.top_level();
        assert_eq!(top.len(), 1);
        assert_eq!(engine.get(top[0].id).unwrap().len(), 0);
        assert!(!top[0].overconstrained);
    }

    #[test]
    fn test_duplicate_pair_marks_overconstrained() {
        let mut engine = ClusterSolver::new(2);
        let (c, cfg) = pair("A", "B", 2.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("A", "B", 2.0);
        seeded(&mut engine, c, cfg);
        let top = engine.top_level();
        assert_eq!(top.len(), 1);
        assert!(top[0].overconstrained);
        // consistent duplicate keeps its solutions
        assert_eq!(engine.get(top[0].id).unwrap().len(), 1);
    }

    #[test]
    fn test_inconsistent_duplicate_pair_drops_solutions() {
        let mut engine = ClusterSolver::new(2);
        let (c, cfg) = pair("A", "B", 2.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("A", "B", 5.0);
        seeded(&mut engine, c, cfg);
        let top = engine.top_level();
        assert_eq!(top.len(), 1);
        assert!(top[0].overconstrained);
        assert!(engine.get(top[0].id).unwrap().is_empty());
    }

    #[test]
    fn test_remove_restores_top_level() {
        let mut engine = ClusterSolver::new(2);
        let (c, cfg) = single("A", 0.0, 0.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = single("B", 1.0, 0.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("A", "B", 1.0);
        let d = seeded(&mut engine, c, cfg);
        assert_eq!(engine.top_level().len(), 1);
        engine.remove(d);
        assert_eq!(engine.top_level().len(), 2);
        assert!(engine.methods().is_empty());
    }

    #[test]
    fn test_set_repropagates() {
        let mut engine = ClusterSolver::new(2);
        let (c, cfg) = single("A", 0.0, 0.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = single("B", 1.0, 0.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("A", "B", 1.0);
        let d = seeded(&mut engine, c, cfg);
        let top_id = engine.top_level()[0].id;
        let before = engine.get(top_id).unwrap()[0].configuration.clone();
        assert_relative_eq!(
            distance(
                before.position("A").unwrap(),
                before.position("B").unwrap()
            ),
            1.0,
            epsilon = 1e-9
        );
        // lengthen the pair; the derived solution follows
        let (_, cfg) = pair("A", "B", 4.0);
        engine.set(d, vec![cfg]);
        let after = engine.get(top_id).unwrap()[0].configuration.clone();
        assert_relative_eq!(
            distance(after.position("A").unwrap(), after.position("B").unwrap()),
            4.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_root_anchors_pair_merge() {
        let mut engine = ClusterSolver::new(2);
        let (c, cfg) = pair("A", "B", 1.0);
        seeded(&mut engine, c, cfg);
        // an absolute frame for A and B, shifted and flipped
        let root = Cluster::rigid(["A", "B"]);
        let root_cfg = Configuration::from_pairs([
            ("A".to_string(), point2(10.0, 5.0)),
            ("B".to_string(), point2(9.0, 5.0)),
        ]);
        let root_id = engine.add(root);
        engine.set_root(root_id);
        engine.set(root_id, vec![root_cfg]);
        let top = engine.top_level();
        assert_eq!(top.len(), 1);
        let sols = engine.get(top[0].id).unwrap();
        assert_eq!(sols.len(), 1);
        let a = sols[0].configuration.position("A").unwrap();
        assert_relative_eq!(a[0], 10.0, epsilon = 1e-9);
        assert_relative_eq!(a[1], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hog_filter_checks_angle() {
        let mut engine = ClusterSolver::new(2);
        // a known right triangle shape
        let rigid = Cluster::rigid(["A", "B", "C"]);
        let rigid_cfg = Configuration::from_pairs([
            ("A".to_string(), point2(1.0, 0.0)),
            ("B".to_string(), point2(0.0, 0.0)),
            ("C".to_string(), point2(0.0, 1.0)),
        ]);
        seeded(&mut engine, rigid, rigid_cfg);
        // an agreeing right-angle hedgehog at B
        let hog = Cluster::hedgehog("B", ["A", "C"]);
        let hog_cfg = Configuration::from_pairs([
            ("B".to_string(), point2(0.0, 0.0)),
            ("A".to_string(), point2(1.0, 0.0)),
            ("C".to_string(), point2(0.0, 1.0)),
        ]);
        seeded(&mut engine, hog, hog_cfg);
        let top = engine.top_level();
        assert_eq!(top.len(), 1);
        assert!(top[0].overconstrained);
        assert_eq!(engine.get(top[0].id).unwrap().len(), 1);
    }

    #[test]
    fn test_engine_events() {
        let mut engine = ClusterSolver::new(2);
        let (c, cfg) = single("A", 0.0, 0.0);
        let id = seeded(&mut engine, c, cfg);
        let events = engine.take_events();
        assert!(events.contains(&EngineEvent::Added(id)));
        assert!(events.contains(&EngineEvent::ConfigurationsSet(id)));
        assert!(engine.take_events().is_empty());
    }

    #[test]
    fn test_selection_rule_filters_derived_solutions() {
        #[derive(Debug)]
        struct AboveAxis {
            vars: Vec<Var>,
        }
        impl SelectionRule for AboveAxis {
            fn variables(&self) -> &[Var] {
                &self.vars
            }
            fn test(&self, configuration: &Configuration) -> bool {
                configuration
                    .position("C")
                    .map_or(false, |p| p[1] >= 0.0)
            }
        }
        let mut engine = ClusterSolver::new(2);
        // no prototypes for selection: add the pairs only
        let (c, cfg) = pair("A", "B", 1.0);
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("B", "C", 1.25f64.sqrt());
        seeded(&mut engine, c, cfg);
        let (c, cfg) = pair("C", "A", 1.25f64.sqrt());
        seeded(&mut engine, c, cfg);
        let top_id = engine.top_level()[0].id;
        // both chiralities survive without prototypes
        assert_eq!(engine.get(top_id).unwrap().len(), 2);
        engine.add_selection(
            Uuid::new_v4(),
            Arc::new(AboveAxis {
                vars: vec!["C".to_string()],
            }),
        );
        let sols = engine.get(top_id).unwrap();
        assert_eq!(sols.len(), 1);
        assert!(sols[0].configuration.position("C").unwrap()[1] >= 0.0);
    }
}
