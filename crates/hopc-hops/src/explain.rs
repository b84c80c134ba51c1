//! Human-readable DAG listing, one line per node in post-order.

use std::fmt::Write as _;

use crate::dag::HopDag;

const MB: f64 = 1024.0 * 1024.0;

fn mem_mb(bytes: f64) -> String {
    if bytes >= hopc_mem::DEFAULT_SIZE {
        "MAX".to_string()
    } else {
        format!("{:.0}", bytes / MB)
    }
}

/// `(id) opcode name (inputs) [rows,cols,blk,nnz] [out,int,total MB] EXEC`
pub fn explain_hops(dag: &HopDag) -> String {
    let mut out = String::new();
    for id in dag.topo_order() {
        let h = dag.hop(id);
        let inputs: Vec<String> = h.inputs.iter().map(|i| i.get().to_string()).collect();
        let exec = h
            .exec_type
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "--({}) {} {} ({}) [{},{},{},{}] [{},{},{}MB] {}{}",
            id.get(),
            h.kind.opcode(),
            h.name,
            inputs.join(","),
            h.stats.rows,
            h.stats.cols,
            h.stats.blocksize,
            h.stats.nnz,
            mem_mb(h.mem.output),
            mem_mb(h.mem.intermediate),
            mem_mb(h.mem.total),
            exec,
            if h.requires_recompile { " [rc]" } else { "" },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopc_core::types::OpOp2;

    #[test]
    fn one_line_per_node() {
        let mut dag = HopDag::new();
        let a = dag.read("A", 10, 10, -1).unwrap();
        let b = dag.read("B", 10, 10, -1).unwrap();
        let p = dag.binary(OpOp2::Plus, a, b).unwrap();
        dag.write("Y", p).unwrap();
        let s = explain_hops(&dag);
        assert_eq!(s.lines().count(), 4);
        assert!(s.contains("b(+)"));
        assert!(s.contains("[10,10,1000,-1]"));
    }
}
