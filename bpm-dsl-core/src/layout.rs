//! Automatic diagram layout.
//!
//! Converts the expanded process graph into element bounds and waypoint
//! routes for the BPMN DI section. Five strictly ordered phases:
//!
//! 1. adjacency build from the author flows
//! 2. longest-path level assignment (BFS relaxation, back-edges excluded)
//! 3. vertical placement, levels centered on a shared baseline
//! 4. symmetric redistribution of gateway branches
//! 5. x assignment and orthogonal edge routing
//!
//! Synthetic entity-validation nodes are not levelled; they are pinned
//! relative to their source element (gateway to the right, error end
//! below) after phase 4. The whole computation is deterministic: the same
//! input yields byte-identical coordinates.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::ast::{Element, Process};
use crate::emitter::Expansion;

/// Pixel sizes per element variant.
pub fn element_dimensions(element: &Element) -> (f64, f64) {
    match element {
        Element::Start(_) | Element::End(_) => (36.0, 36.0),
        Element::Gateway(_) => (50.0, 50.0),
        // ProcessEntity renders as a service task.
        Element::Script(_) | Element::Service(_) | Element::Entity(_) => (100.0, 80.0),
    }
}

pub const GATEWAY_SIZE: (f64, f64) = (50.0, 50.0);
pub const EVENT_SIZE: (f64, f64) = (36.0, 36.0);

/// Offset of a synthetic validation gateway from its entity task.
const ENTITY_GATEWAY_OFFSET: f64 = 80.0;
/// Drop of the synthetic error end below the gateway.
const ENTITY_ERROR_DROP: f64 = 60.0;

/// Same-row tolerance for straight (two-waypoint) edges.
const STRAIGHT_TOLERANCE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub top: f64,
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
}

/// Spacing configuration; a plain value, no process-wide state.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    pub horizontal: f64,
    pub vertical: f64,
    pub level_spacing: f64,
    pub gateway_branch_spacing: f64,
    pub margins: Margins,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            horizontal: 150.0,
            vertical: 100.0,
            level_spacing: 200.0,
            gateway_branch_spacing: 120.0,
            margins: Margins {
                top: 50.0,
                left: 50.0,
                right: 50.0,
                bottom: 50.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRoute {
    pub source_id: String,
    pub target_id: String,
    pub waypoints: Vec<Waypoint>,
}

/// Result of one layout run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layout {
    pub positions: HashMap<String, Bounds>,
    /// Keyed by sequence-flow id.
    pub routes: HashMap<String, EdgeRoute>,
}

/// Compute positions and edge routes for the expanded process graph.
pub fn compute(process: &Process, expansion: &Expansion, config: &LayoutConfig) -> Layout {
    let engine = Engine::new(process, config);
    engine.run(expansion)
}

struct Engine<'a> {
    process: &'a Process,
    config: &'a LayoutConfig,
    /// Author flows with both endpoints resolvable, self-loops dropped.
    edges: Vec<(&'a str, &'a str)>,
    successors: HashMap<&'a str, Vec<&'a str>>,
}

struct Levelling<'a> {
    level: HashMap<&'a str, usize>,
    /// Level → member ids, in first-encounter order.
    levels: Vec<Vec<&'a str>>,
}

impl<'a> Engine<'a> {
    fn new(process: &'a Process, config: &'a LayoutConfig) -> Self {
        let known: HashSet<&str> = process.elements.iter().map(|e| e.id()).collect();

        let mut edges = Vec::new();
        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        for flow in &process.flows {
            let (s, t) = (flow.source_id.as_str(), flow.target_id.as_str());
            if s == t || !known.contains(s) || !known.contains(t) {
                continue;
            }
            edges.push((s, t));
            successors.entry(s).or_default().push(t);
        }

        Self {
            process,
            config,
            edges,
            successors,
        }
    }

    fn run(&self, expansion: &Expansion) -> Layout {
        let levelling = self.assign_levels();
        let mut positions = self.place_vertically(&levelling);
        self.adjust_gateway_branches(&levelling, &mut positions);
        self.assign_x(&levelling, &mut positions);
        self.place_synthetics(expansion, &mut positions);
        let routes = self.route_edges(expansion, &positions);

        Layout { positions, routes }
    }

    fn roots(&self) -> Vec<&'a str> {
        let starts: Vec<&str> = self
            .process
            .elements
            .iter()
            .filter(|e| matches!(e, Element::Start(_)))
            .map(|e| e.id())
            .collect();
        if !starts.is_empty() {
            return starts;
        }

        // Fallback: elements without predecessors, in author order.
        let targets: HashSet<&str> = self.edges.iter().map(|&(_, t)| t).collect();
        let no_preds: Vec<&str> = self
            .process
            .elements
            .iter()
            .map(|e| e.id())
            .filter(|id| !targets.contains(id))
            .collect();
        if !no_preds.is_empty() {
            return no_preds;
        }

        self.process.elements.first().map(|e| e.id()).into_iter().collect()
    }

    /// Detect back-edges with a colored DFS so the BFS relaxation below
    /// terminates on authored cycles.
    fn back_edges(&self, roots: &[&'a str]) -> HashSet<(&'a str, &'a str)> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<&str, Color> = self
            .process
            .elements
            .iter()
            .map(|e| (e.id(), Color::White))
            .collect();
        let mut back = HashSet::new();

        for &root in roots {
            if color.get(root) != Some(&Color::White) {
                continue;
            }
            // (node, next successor index) stack.
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
            color.insert(root, Color::Gray);

            while let Some(&(node, next)) = stack.last() {
                let succs = self.successors.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if next < succs.len() {
                    stack.last_mut().unwrap().1 += 1;
                    let succ = succs[next];
                    match color.get(succ) {
                        Some(Color::White) => {
                            color.insert(succ, Color::Gray);
                            stack.push((succ, 0));
                        }
                        Some(Color::Gray) => {
                            back.insert((node, succ));
                        }
                        _ => {}
                    }
                } else {
                    color.insert(node, Color::Black);
                    stack.pop();
                }
            }
        }

        back
    }

    /// Phase 2: longest-path levels via BFS relaxation, ignoring back-edges.
    fn assign_levels(&self) -> Levelling<'a> {
        let roots = self.roots();
        let back = self.back_edges(&roots);

        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut first_seen: Vec<&str> = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        for &root in &roots {
            if !level.contains_key(root) {
                level.insert(root, 0);
                first_seen.push(root);
                queue.push_back(root);
            }
        }

        while let Some(node) = queue.pop_front() {
            let next_level = level[node] + 1;
            let succs = self.successors.get(node).map(Vec::as_slice).unwrap_or(&[]);
            for &succ in succs {
                if back.contains(&(node, succ)) {
                    continue;
                }
                match level.get(succ) {
                    None => {
                        level.insert(succ, next_level);
                        first_seen.push(succ);
                        queue.push_back(succ);
                    }
                    Some(&current) if next_level > current => {
                        level.insert(succ, next_level);
                        queue.push_back(succ);
                    }
                    _ => {}
                }
            }
        }

        // Unreached elements (rejected by the validator, but layout must
        // not panic on them) go to level 0 after everything else.
        for element in &self.process.elements {
            let id = element.id();
            if !level.contains_key(id) {
                level.insert(id, 0);
                first_seen.push(id);
            }
        }

        let max_level = level.values().copied().max().unwrap_or(0);
        let mut levels: Vec<Vec<&str>> = vec![Vec::new(); max_level + 1];
        for &id in &first_seen {
            levels[level[&id]].push(id);
        }

        Levelling { level, levels }
    }

    fn dimensions_of(&self, id: &str) -> (f64, f64) {
        self.process
            .elements
            .iter()
            .find(|e| e.id() == id)
            .map(element_dimensions)
            .unwrap_or((100.0, 80.0))
    }

    /// Phase 3: stack each level around a shared baseline; the middle
    /// element of a level sits on the baseline.
    fn place_vertically(&self, levelling: &Levelling<'a>) -> HashMap<String, Bounds> {
        let pitch = self.config.vertical;

        let max_level_height = levelling
            .levels
            .iter()
            .filter(|members| !members.is_empty())
            .map(|members| {
                let tallest = members
                    .iter()
                    .map(|id| self.dimensions_of(id).1)
                    .fold(0.0, f64::max);
                (members.len() as f64 - 1.0) * pitch + tallest
            })
            .fold(0.0, f64::max);

        let baseline = self.config.margins.top + max_level_height / 2.0;

        let mut positions = HashMap::new();
        for members in &levelling.levels {
            let n = members.len() as f64;
            for (i, &id) in members.iter().enumerate() {
                let (width, height) = self.dimensions_of(id);
                let center_y = baseline + (i as f64 - (n - 1.0) / 2.0) * pitch;
                positions.insert(
                    id.to_string(),
                    Bounds {
                        x: 0.0, // assigned in phase 5
                        y: center_y - height / 2.0,
                        width,
                        height,
                    },
                );
            }
        }
        positions
    }

    /// Phase 4: redistribute direct gateway successors symmetrically
    /// around the gateway's own center. Only successors sitting exactly
    /// one level to the right are moved; anything pulled further right by
    /// other predecessors keeps its phase-3 placement.
    fn adjust_gateway_branches(
        &self,
        levelling: &Levelling<'a>,
        positions: &mut HashMap<String, Bounds>,
    ) {
        for element in &self.process.elements {
            let Element::Gateway(gateway) = element else {
                continue;
            };
            let succs = self
                .successors
                .get(gateway.id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if succs.len() < 2 {
                continue;
            }

            let Some(gateway_bounds) = positions.get(gateway.id.as_str()).copied() else {
                continue;
            };
            let gateway_level = levelling.level[gateway.id.as_str()];

            let pitch = self.config.gateway_branch_spacing;
            let total = (succs.len() as f64 - 1.0) * pitch;
            let first_center = gateway_bounds.center_y() - total / 2.0;

            for (i, &succ) in succs.iter().enumerate() {
                if levelling.level.get(succ) != Some(&(gateway_level + 1)) {
                    continue;
                }
                if let Some(bounds) = positions.get_mut(succ) {
                    let center_y = first_center + i as f64 * pitch;
                    bounds.y = center_y - bounds.height / 2.0;
                }
            }
        }
    }

    /// Phase 5a: `x = left margin + level * level spacing`.
    fn assign_x(&self, levelling: &Levelling<'a>, positions: &mut HashMap<String, Bounds>) {
        for (id, level) in &levelling.level {
            if let Some(bounds) = positions.get_mut(*id) {
                bounds.x = self.config.margins.left + *level as f64 * self.config.level_spacing;
            }
        }
    }

    /// Pin the synthetic validation gateway and error end relative to
    /// their entity task.
    fn place_synthetics(&self, expansion: &Expansion, positions: &mut HashMap<String, Bounds>) {
        for entity in &expansion.entities {
            let Some(entity_bounds) = positions.get(&entity.entity_id).copied() else {
                continue;
            };

            let (gw, gh) = GATEWAY_SIZE;
            let gateway = Bounds {
                x: entity_bounds.right() + ENTITY_GATEWAY_OFFSET,
                y: entity_bounds.y + (entity_bounds.height - gh) / 2.0,
                width: gw,
                height: gh,
            };

            let (ew, eh) = EVENT_SIZE;
            let error = Bounds {
                x: gateway.x + (gw - ew) / 2.0,
                y: gateway.bottom() + ENTITY_ERROR_DROP,
                width: ew,
                height: eh,
            };

            positions.insert(entity.gateway_id.clone(), gateway);
            positions.insert(entity.error_id.clone(), error);
        }
    }

    /// Phase 5b: waypoint routing over the expanded flow list.
    fn route_edges(
        &self,
        expansion: &Expansion,
        positions: &HashMap<String, Bounds>,
    ) -> HashMap<String, EdgeRoute> {
        let mut routes = HashMap::new();
        for flow in &expansion.flows {
            let (Some(source), Some(target)) = (
                positions.get(&flow.source_id),
                positions.get(&flow.target_id),
            ) else {
                continue;
            };
            routes.insert(
                flow.id.clone(),
                EdgeRoute {
                    source_id: flow.source_id.clone(),
                    target_id: flow.target_id.clone(),
                    waypoints: route_waypoints(source, target),
                },
            );
        }
        routes
    }
}

/// Anchor at the source's right-edge midpoint and the target's left-edge
/// midpoint; straight when (nearly) level, otherwise an orthogonal Z.
/// Same-column targets below the source get a vertical drop instead
/// (the synthetic error-end edge).
fn route_waypoints(source: &Bounds, target: &Bounds) -> Vec<Waypoint> {
    if (source.center_x() - target.center_x()).abs() < 1.0 && target.y >= source.bottom() {
        return vec![
            Waypoint {
                x: source.center_x(),
                y: source.bottom(),
            },
            Waypoint {
                x: target.center_x(),
                y: target.y,
            },
        ];
    }

    let start = Waypoint {
        x: source.right(),
        y: source.center_y(),
    };
    let end = Waypoint {
        x: target.x,
        y: target.center_y(),
    };

    if (start.y - end.y).abs() < STRAIGHT_TOLERANCE {
        return vec![start, end];
    }

    let mid_x = (start.x + end.x) / 2.0;
    vec![
        start,
        Waypoint { x: mid_x, y: start.y },
        Waypoint { x: mid_x, y: end.y },
        end,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::expand;
    use crate::parser::parse_str;

    fn layout_of(source: &str) -> (Layout, crate::ast::Process) {
        let process = parse_str(source).unwrap();
        let expansion = expand(&process);
        let layout = compute(&process, &expansion, &LayoutConfig::default());
        (layout, process)
    }

    const LINEAR: &str = r#"
        process "P" {
            id: "p"
            start "S" { id: "s" }
            scriptCall "T" { id: "t" script: "x" }
            end "E" { id: "e" }
            flow { "s" -> "t" "t" -> "e" }
        }
    "#;

    #[test]
    fn linear_levels_left_to_right() {
        let (layout, _) = layout_of(LINEAR);

        let s = layout.positions["s"];
        let t = layout.positions["t"];
        let e = layout.positions["e"];

        assert_eq!(s.x, 50.0);
        assert_eq!(t.x, 250.0);
        assert_eq!(e.x, 450.0);
        assert_eq!((s.width, s.height), (36.0, 36.0));
        assert_eq!((t.width, t.height), (100.0, 80.0));
    }

    #[test]
    fn linear_elements_share_the_baseline() {
        let (layout, _) = layout_of(LINEAR);

        // Tallest level carries a task (80px), so the baseline sits at
        // top margin + 40.
        let s = layout.positions["s"];
        let t = layout.positions["t"];
        let e = layout.positions["e"];
        assert_eq!(s.center_y(), 90.0);
        assert_eq!(t.center_y(), 90.0);
        assert_eq!(e.center_y(), 90.0);
    }

    #[test]
    fn straight_edge_has_two_waypoints() {
        let (layout, _) = layout_of(LINEAR);

        let route = &layout.routes["flow_s_to_t"];
        assert_eq!(route.waypoints.len(), 2);
        assert_eq!(route.waypoints[0].x, 86.0); // right edge of start
        assert_eq!(route.waypoints[0].y, 90.0);
        assert_eq!(route.waypoints[1].x, 250.0); // left edge of task
        assert_eq!(route.waypoints[1].y, 90.0);
    }

    const BRANCHED: &str = r#"
        process "P" {
            id: "p"
            start "S" { id: "s" }
            xorGateway "G" { id: "g" }
            scriptCall "A" { id: "a" script: "1" }
            scriptCall "B" { id: "b" script: "2" }
            end "E" { id: "e" }
            flow {
                "s" -> "g"
                "g" -> "a" [condition: "x > 0"]
                "g" -> "b"
                "a" -> "e"
                "b" -> "e"
            }
        }
    "#;

    #[test]
    fn gateway_branches_are_symmetric() {
        let (layout, _) = layout_of(BRANCHED);

        let g = layout.positions["g"];
        let a = layout.positions["a"];
        let b = layout.positions["b"];

        // Branch successors sit 120px apart, centered on the gateway.
        assert_eq!(a.center_y(), g.center_y() - 60.0);
        assert_eq!(b.center_y(), g.center_y() + 60.0);
        assert_eq!(a.x, b.x);
    }

    #[test]
    fn branch_edges_route_as_orthogonal_z() {
        let (layout, _) = layout_of(BRANCHED);

        let route = &layout.routes["flow_g_to_a"];
        assert_eq!(route.waypoints.len(), 4);
        // Vertical segment halfway between gateway and task.
        assert_eq!(route.waypoints[1].x, route.waypoints[2].x);
        assert_eq!(route.waypoints[0].y, route.waypoints[1].y);
        assert_eq!(route.waypoints[2].y, route.waypoints[3].y);
    }

    #[test]
    fn diamond_join_uses_longest_path_level() {
        let (layout, _) = layout_of(BRANCHED);

        // e joins both branches at level 3.
        assert_eq!(layout.positions["e"].x, 50.0 + 3.0 * 200.0);
    }

    #[test]
    fn entity_synthetics_are_pinned_to_the_task() {
        let (layout, _) = layout_of(
            r#"
            process "P" {
                id: "p"
                start "S" { id: "s" }
                processEntity "Load" { entityName: "Customer" }
                scriptCall "Next" { id: "next" script: "x" }
                end "E" { id: "e" }
                flow {
                    "s" -> "load"
                    "load" -> "next"
                    "next" -> "e"
                }
            }
            "#,
        );

        let entity = layout.positions["load"];
        let gateway = layout.positions["load-validation-gateway"];
        let error = layout.positions["load-validation-error"];

        assert_eq!(gateway.x, entity.right() + 80.0);
        assert_eq!(gateway.center_y(), entity.center_y());
        assert_eq!(error.center_x(), gateway.center_x());
        assert_eq!(error.y, gateway.bottom() + 60.0);

        // The error edge drops vertically: exactly two waypoints.
        let route = &layout.routes["flow_load-validation-gateway_to_load-validation-error"];
        assert_eq!(route.waypoints.len(), 2);
        assert_eq!(route.waypoints[0].x, gateway.center_x());
        assert_eq!(route.waypoints[0].y, gateway.bottom());
        assert_eq!(route.waypoints[1].y, error.y);
    }

    #[test]
    fn authored_cycle_terminates_with_forward_leap() {
        let (layout, _) = layout_of(
            r#"
            process "P" {
                id: "p"
                start "S" { id: "s" }
                scriptCall "A" { id: "a" script: "1" }
                xorGateway "G" { id: "g" }
                end "E" { id: "e" }
                flow {
                    "s" -> "a"
                    "a" -> "g"
                    "g" -> "a" [condition: "retry"]
                    "g" -> "e"
                }
            }
            "#,
        );

        // The back-edge g -> a is ignored for levelling: a stays left of g.
        assert!(layout.positions["a"].x < layout.positions["g"].x);
        // But the edge is still routed.
        assert!(layout.routes.contains_key("flow_g_to_a"));
    }

    #[test]
    fn layout_is_deterministic() {
        let process = parse_str(BRANCHED).unwrap();
        let expansion = expand(&process);
        let first = compute(&process, &expansion, &LayoutConfig::default());
        let second = compute(&process, &expansion, &LayoutConfig::default());
        assert_eq!(first, second);
    }

    #[test]
    fn spacing_config_is_honored() {
        let process = parse_str(LINEAR).unwrap();
        let expansion = expand(&process);
        let config = LayoutConfig {
            level_spacing: 300.0,
            ..LayoutConfig::default()
        };
        let layout = compute(&process, &expansion, &config);
        assert_eq!(layout.positions["t"].x, 350.0);
    }
}
