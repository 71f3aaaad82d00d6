use crate::engine::{AreaId, LineId, NodeId};

/// An element of the topological structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopoElement {
    Line(LineId),
    Node(NodeId),
}

/// Raw topology of one element as reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyInfo {
    Point,
    Line,
    /// Areas on both sides, `0` means no area.
    Boundary { left: AreaId, right: AreaId },
    /// Area of the centroid: positive when inside, `0` outside of any area,
    /// negative when another centroid already claims that area.
    Centroid { area: AreaId },
    Node { lines: usize },
}

/// Classification of an element's role in the topology, used for symbolizing
/// topology while editing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TopoSymbol {
    #[default]
    TopoUndefined,
    TopoPoint,
    TopoLine,
    TopoBoundary0,
    TopoBoundary1,
    TopoBoundary2,
    TopoCentroidIn,
    TopoCentroidOut,
    TopoCentroidDupl,
    TopoNode0,
    TopoNode1,
    TopoNode2,
}

impl TopoSymbol {
    pub fn from_topology(info: Option<TopologyInfo>) -> TopoSymbol {
        let Some(info) = info else {
            return TopoSymbol::TopoUndefined;
        };
        match info {
            TopologyInfo::Point => TopoSymbol::TopoPoint,
            TopologyInfo::Line => TopoSymbol::TopoLine,
            TopologyInfo::Boundary { left, right } => match (left != 0, right != 0) {
                (true, true) => TopoSymbol::TopoBoundary2,
                (false, false) => TopoSymbol::TopoBoundary0,
                _ => TopoSymbol::TopoBoundary1,
            },
            TopologyInfo::Centroid { area } => match area {
                0 => TopoSymbol::TopoCentroidOut,
                a if a > 0 => TopoSymbol::TopoCentroidIn,
                _ => TopoSymbol::TopoCentroidDupl,
            },
            TopologyInfo::Node { lines: 0 } => TopoSymbol::TopoNode0,
            TopologyInfo::Node { lines: 1 } => TopoSymbol::TopoNode1,
            TopologyInfo::Node { .. } => TopoSymbol::TopoNode2,
        }
    }
}
