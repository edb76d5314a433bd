//! Static table of the tools exposed to clients.

/// Where a tool call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Worker,
    Local,
}

/// How a tool selects the operation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolShape {
    /// One tool name fronting several methods, selected by `field`.
    Consolidated {
        field: &'static str,
        methods: &'static [&'static str],
    },
    /// The tool name is itself the worker method.
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub shape: ToolShape,
    pub execution: Execution,
}

impl ToolSpec {
    pub fn discriminator_field(&self) -> Option<&'static str> {
        match self.shape {
            ToolShape::Consolidated { field, .. } => Some(field),
            ToolShape::Single => None,
        }
    }

    pub fn methods(&self) -> &'static [&'static str] {
        match self.shape {
            ToolShape::Consolidated { methods, .. } => methods,
            ToolShape::Single => &[],
        }
    }

    pub fn supports(&self, method: &str) -> bool {
        self.methods().contains(&method)
    }

    /// Worker-facing method name for `method` (ignored by single-method tools).
    pub fn worker_method(&self, method: Option<&str>) -> String {
        match (self.shape, method) {
            (ToolShape::Consolidated { .. }, Some(method)) => format!("{}_{method}", self.name),
            _ => self.name.to_string(),
        }
    }
}

const CAS_METHODS: &[&str] = &[
    "evaluate",
    "diff",
    "integrate",
    "solve_equation",
    "solve_ode",
    "propagate_uncertainty",
];
const PLOT_METHODS: &[&str] = &[
    "function_2d",
    "parametric_2d",
    "field_2d",
    "phase_portrait",
    "surface_3d",
    "contour_2d",
    "volume_3d",
    "animation",
    "interactive",
    "vr_export",
];
const QUANTUM_METHODS: &[&str] = &["ops", "solve", "visualize"];
const DATA_METHODS: &[&str] = &[
    "import_hdf5",
    "import_fits",
    "import_root",
    "export_hdf5",
    "fft",
    "filter",
    "spectrogram",
    "wavelet",
];
const API_METHODS: &[&str] = &["arxiv", "cern", "nasa", "nist"];
const EXPORT_METHODS: &[&str] = &["overleaf", "github", "zenodo", "jupyter"];
const ML_METHODS: &[&str] = &[
    "symbolic_regression",
    "surrogate_pde",
    "pattern_recognition",
    "explain_derivation",
];
const DISTRIBUTED_METHODS: &[&str] = &[
    "job_submit",
    "session_share",
    "lab_notebook",
    "artifact_versioning",
];
const ORCHESTRATOR_METHODS: &[&str] = &[
    "define_dag",
    "validate_dag",
    "run_dag",
    "publish_report",
    "collaborate_share",
];
const REPORT_METHODS: &[&str] = &["generate"];

pub const TOOL_CATALOG: &[ToolSpec] = &[
    ToolSpec {
        name: "cas",
        description: "Computer algebra: evaluate, differentiate, integrate and solve expressions.",
        shape: ToolShape::Consolidated {
            field: "action",
            methods: CAS_METHODS,
        },
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "plot",
        description: "Render 2D/3D plots, volumes, animations, interactive grids and VR scenes.",
        shape: ToolShape::Consolidated {
            field: "plot_type",
            methods: PLOT_METHODS,
        },
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "units_convert",
        description: "Convert a quantity between physical units.",
        shape: ToolShape::Single,
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "constants_get",
        description: "Look up a physical constant with its unit and uncertainty.",
        shape: ToolShape::Single,
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "tensor_algebra",
        description: "Tensor calculus helpers: metrics, Christoffel symbols, curvature.",
        shape: ToolShape::Single,
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "quantum",
        description: "Quantum operators, Schroedinger solvers and state visualization.",
        shape: ToolShape::Consolidated {
            field: "action",
            methods: QUANTUM_METHODS,
        },
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "statmech_partition",
        description: "Partition functions and derived thermodynamic quantities.",
        shape: ToolShape::Single,
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "data",
        description: "Scientific data import/export and signal processing.",
        shape: ToolShape::Consolidated {
            field: "action",
            methods: DATA_METHODS,
        },
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "api",
        description: "Query external scientific services (arXiv, CERN, NASA, NIST).",
        shape: ToolShape::Consolidated {
            field: "action",
            methods: API_METHODS,
        },
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "export",
        description: "Export results to Overleaf, GitHub, Zenodo or Jupyter.",
        shape: ToolShape::Consolidated {
            field: "action",
            methods: EXPORT_METHODS,
        },
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "ml",
        description: "Symbolic regression, PDE surrogates, pattern recognition and derivation walkthroughs.",
        shape: ToolShape::Consolidated {
            field: "action",
            methods: ML_METHODS,
        },
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "distributed",
        description: "Submit compute jobs, share sessions, keep lab notebooks and version artifacts.",
        shape: ToolShape::Consolidated {
            field: "action",
            methods: DISTRIBUTED_METHODS,
        },
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "orchestrator",
        description: "Define, validate and run experiment DAGs, then publish or share the results.",
        shape: ToolShape::Consolidated {
            field: "action",
            methods: ORCHESTRATOR_METHODS,
        },
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "nli_parse",
        description: "Parse a natural-language physics request into a tool name and arguments.",
        shape: ToolShape::Single,
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "accel_caps",
        description: "Report available compute acceleration devices.",
        shape: ToolShape::Single,
        execution: Execution::Worker,
    },
    ToolSpec {
        name: "report",
        description: "Generate a Markdown report of the current session.",
        shape: ToolShape::Consolidated {
            field: "action",
            methods: REPORT_METHODS,
        },
        execution: Execution::Local,
    },
];

/// An individual tool name kept for older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyAlias {
    pub name: &'static str,
    pub tool: &'static str,
    pub method: &'static str,
}

const fn alias(name: &'static str, tool: &'static str, method: &'static str) -> LegacyAlias {
    LegacyAlias { name, tool, method }
}

pub const LEGACY_ALIASES: &[LegacyAlias] = &[
    alias("cas_evaluate", "cas", "evaluate"),
    alias("cas_diff", "cas", "diff"),
    alias("cas_integrate", "cas", "integrate"),
    alias("cas_solve_equation", "cas", "solve_equation"),
    alias("cas_solve_ode", "cas", "solve_ode"),
    alias("cas_propagate_uncertainty", "cas", "propagate_uncertainty"),
    alias("plot_function_2d", "plot", "function_2d"),
    alias("plot_parametric_2d", "plot", "parametric_2d"),
    alias("plot_field_2d", "plot", "field_2d"),
    alias("plot_phase_portrait", "plot", "phase_portrait"),
    alias("plot_surface_3d", "plot", "surface_3d"),
    alias("plot_contour_2d", "plot", "contour_2d"),
    alias("plot_volume_3d", "plot", "volume_3d"),
    alias("plot_animation", "plot", "animation"),
    alias("plot_interactive", "plot", "interactive"),
    alias("plot_vr_export", "plot", "vr_export"),
    alias("quantum_ops", "quantum", "ops"),
    alias("quantum_solve", "quantum", "solve"),
    alias("quantum_visualize", "quantum", "visualize"),
    alias("data_import_hdf5", "data", "import_hdf5"),
    alias("data_import_fits", "data", "import_fits"),
    alias("data_import_root", "data", "import_root"),
    alias("data_export_hdf5", "data", "export_hdf5"),
    alias("data_fft", "data", "fft"),
    alias("data_filter", "data", "filter"),
    alias("data_spectrogram", "data", "spectrogram"),
    alias("data_wavelet", "data", "wavelet"),
    alias("api_arxiv", "api", "arxiv"),
    alias("api_cern", "api", "cern"),
    alias("api_nasa", "api", "nasa"),
    alias("api_nist", "api", "nist"),
    alias("export_overleaf", "export", "overleaf"),
    alias("export_github", "export", "github"),
    alias("export_zenodo", "export", "zenodo"),
    alias("export_jupyter", "export", "jupyter"),
    alias("ml_symbolic_regression", "ml", "symbolic_regression"),
    alias("ml_surrogate_pde", "ml", "surrogate_pde"),
    alias("ml_pattern_recognition", "ml", "pattern_recognition"),
    alias("ml_explain_derivation", "ml", "explain_derivation"),
    alias("distributed_job_submit", "distributed", "job_submit"),
    alias("distributed_session_share", "distributed", "session_share"),
    alias("distributed_lab_notebook", "distributed", "lab_notebook"),
    alias("distributed_artifact_versioning", "distributed", "artifact_versioning"),
    alias("job_submit", "distributed", "job_submit"),
    alias("session_share", "distributed", "session_share"),
    alias("lab_notebook", "distributed", "lab_notebook"),
    alias("artifact_versioning", "distributed", "artifact_versioning"),
    alias("orchestrator_define_dag", "orchestrator", "define_dag"),
    alias("orchestrator_validate_dag", "orchestrator", "validate_dag"),
    alias("orchestrator_run_dag", "orchestrator", "run_dag"),
    alias("orchestrator_publish_report", "orchestrator", "publish_report"),
    alias("orchestrator_collaborate_share", "orchestrator", "collaborate_share"),
    alias("define_dag", "orchestrator", "define_dag"),
    alias("run_dag", "orchestrator", "run_dag"),
    alias("report_generate", "report", "generate"),
];

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOL_CATALOG.iter().find(|tool| tool.name == name)
}

/// Resolves a legacy individual name such as `cas_evaluate` to its tool and method.
pub fn resolve_legacy_name(name: &str) -> Option<(&'static ToolSpec, &'static str)> {
    let alias = LEGACY_ALIASES.iter().find(|alias| alias.name == name)?;
    let tool = find_tool(alias.tool)?;
    tool.methods()
        .iter()
        .copied()
        .find(|method| *method == alias.method)
        .map(|method| (tool, method))
}

/// Every legacy individual name accepted by the router.
pub fn legacy_names() -> impl Iterator<Item = &'static str> {
    LEGACY_ALIASES.iter().map(|alias| alias.name)
}
