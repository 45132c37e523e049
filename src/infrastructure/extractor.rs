//! Rust source extraction with `syn`.
//!
//! Two passes: a parallel function index over all files, then a parallel
//! body walk per file that emits elements, relations and control
//! dependencies. Variables are versioned on reassignment (`f::x`, `f::x@2`)
//! so straight-line rebinding never produces a cycle.

use std::collections::{BTreeSet, HashMap, HashSet};

use rayon::prelude::*;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::{BinOp, Expr, Item, Pat, Stmt, Token};

use crate::domain::element::{
    ControlDependency, ProgramElement, ProgramStructure, Relation, RelationKind, SourceFile,
};
use crate::domain::graph::NodeKind;
use crate::domain::index::{module_of, FunctionIndex, FunctionSignature};
use crate::errors::ExtractError;
use crate::ports::ElementExtractor;

const EFFECT_MACROS: &[&str] = &[
    "print", "println", "eprint", "eprintln", "dbg", "trace", "debug", "info", "warn", "error",
    "log",
];
const IO_METHODS: &[&str] = &["write", "write_all", "write_fmt", "flush", "send"];
const IO_PATH_ROOTS: &[&str] = &["fs", "File", "OpenOptions", "io"];

#[derive(Debug, Default, Clone)]
pub struct SynElementExtractor {
    strict: bool,
}

impl SynElementExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on the first unparsable file instead of skipping it.
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

impl ElementExtractor for SynElementExtractor {
    fn extract(&self, sources: &[SourceFile]) -> Result<ProgramStructure, ExtractError> {
        let index = FunctionIndex::build(sources, self.strict)?;
        let per_file: Vec<ProgramStructure> = sources
            .par_iter()
            .map(|file| extract_file(file, &index))
            .collect();

        let mut merged = ProgramStructure::default();
        let mut ids = HashSet::new();
        for part in per_file {
            for element in part.elements {
                if ids.insert(element.id.clone()) {
                    merged.elements.push(element);
                }
            }
            merged.relations.extend(part.relations);
            merged.control_flow.extend(part.control_flow);
        }
        merged
            .relations
            .retain(|r| ids.contains(&r.source) && ids.contains(&r.target));
        merged
            .control_flow
            .retain(|c| ids.contains(&c.predicate) && ids.contains(&c.dependent));

        tracing::debug!(
            files = sources.len(),
            functions = index.len(),
            elements = merged.elements.len(),
            relations = merged.relations.len(),
            "extracted program structure"
        );
        Ok(merged)
    }
}

fn extract_file(file: &SourceFile, index: &FunctionIndex) -> ProgramStructure {
    let mut out = ProgramStructure::default();
    // Parse failures were already reported while indexing.
    if let Ok(ast) = syn::parse_file(&file.content) {
        let module = module_of(&file.path);
        walk_items(&module, &module, &file.path, &ast.items, index, &mut out);
    }
    out
}

fn walk_items(
    module: &str,
    prefix: &str,
    path: &str,
    items: &[Item],
    index: &FunctionIndex,
    out: &mut ProgramStructure,
) {
    for item in items {
        match item {
            Item::Fn(func) => {
                walk_function(module, prefix, path, &func.sig, &func.block, index, out)
            }
            Item::Impl(imp) => {
                let syn::Type::Path(tp) = &*imp.self_ty else {
                    continue;
                };
                let Some(segment) = tp.path.segments.last() else {
                    continue;
                };
                let type_prefix = format!("{}::{}", prefix, segment.ident);
                for impl_item in &imp.items {
                    if let syn::ImplItem::Fn(method) = impl_item {
                        walk_function(
                            module,
                            &type_prefix,
                            path,
                            &method.sig,
                            &method.block,
                            index,
                            out,
                        );
                    }
                }
            }
            Item::Mod(m) => {
                if let Some((_, content)) = &m.content {
                    let nested = format!("{}::{}", prefix, m.ident);
                    walk_items(module, &nested, path, content, index, out);
                }
            }
            _ => {}
        }
    }
}

fn walk_function(
    module: &str,
    prefix: &str,
    path: &str,
    sig: &syn::Signature,
    block: &syn::Block,
    index: &FunctionIndex,
    out: &mut ProgramStructure,
) {
    let id = format!("{}::{}", prefix, sig.ident);
    let location = format!("{}:{}", path, sig.ident.span().start().line);
    let Some(signature) = index.get(&id).filter(|s| s.location == location) else {
        return;
    };

    let mut walker = FunctionWalker {
        index,
        module,
        path,
        func: signature.id.clone(),
        has_return: signature.has_return,
        locals: HashMap::new(),
        versions: HashMap::new(),
        used: HashSet::new(),
        guards: Vec::new(),
        out: ProgramStructure::default(),
    };
    walker.enter(&signature, sig.ident.span().start().line);

    let count = block.stmts.len();
    for (i, stmt) in block.stmts.iter().enumerate() {
        match stmt {
            Stmt::Expr(tail, None) if i + 1 == count => {
                let refs = walker.refs_of(tail);
                walker.visit_expr(tail);
                walker.return_site(&refs);
            }
            _ => walker.visit_stmt(stmt),
        }
    }

    out.elements.extend(walker.out.elements);
    out.relations.extend(walker.out.relations);
    out.control_flow.extend(walker.out.control_flow);
}

/// Locals and callee return sites an expression reads.
#[derive(Debug, Default, Clone)]
struct Refs {
    locals: BTreeSet<String>,
    returns: BTreeSet<String>,
}

impl Refs {
    fn sources(&self) -> impl Iterator<Item = &String> {
        self.locals.iter().chain(&self.returns)
    }
}

struct FunctionWalker<'a> {
    index: &'a FunctionIndex,
    module: &'a str,
    path: &'a str,
    func: String,
    has_return: bool,
    // local name -> element id of its current version
    locals: HashMap<String, String>,
    versions: HashMap<String, usize>,
    used: HashSet<String>,
    // predicate element ids of the enclosing branches
    guards: Vec<Vec<String>>,
    out: ProgramStructure,
}

impl FunctionWalker<'_> {
    fn enter(&mut self, signature: &FunctionSignature, line: usize) {
        let func = self.func.clone();
        self.push_element(&func, NodeKind::Function, line);
        for param in signature.params.iter().flatten() {
            let pid = format!("{}::{}", func, param);
            self.push_element(&pid, NodeKind::Variable, line);
            self.relate(&func, &pid, RelationKind::DataFlow);
            self.locals.insert(param.clone(), pid);
            self.versions.insert(param.clone(), 1);
        }
        if self.has_return {
            self.push_element(&format!("{}::return", func), NodeKind::Return, line);
        }
    }

    fn push_element(&mut self, id: &str, kind: NodeKind, line: usize) {
        self.used.insert(id.to_string());
        self.out.elements.push(
            ProgramElement::new(id, kind)
                .with_attribute("function", self.func.clone())
                .with_attribute("file", self.path)
                .with_attribute("line", line.to_string()),
        );
    }

    fn relate(&mut self, source: &str, target: &str, kind: RelationKind) {
        self.out.relations.push(Relation::new(source, target, kind));
    }

    fn guard_dependent(&mut self, dependent: &str) {
        let predicates: BTreeSet<String> = self.guards.iter().flatten().cloned().collect();
        for predicate in predicates {
            if predicate != dependent {
                self.out.control_flow.push(ControlDependency {
                    predicate,
                    dependent: dependent.to_string(),
                });
            }
        }
    }

    fn unique(&self, base: String) -> String {
        if !self.used.contains(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}#{}", base, n);
            if !self.used.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn define_local(&mut self, name: &str, refs: &Refs, line: usize) {
        let version = {
            let v = self.versions.entry(name.to_string()).or_insert(0);
            *v += 1;
            *v
        };
        let base = if version == 1 {
            format!("{}::{}", self.func, name)
        } else {
            format!("{}::{}@{}", self.func, name, version)
        };
        let id = self.unique(base);
        self.push_element(&id, NodeKind::Variable, line);
        for source in refs.sources().cloned().collect::<Vec<_>>() {
            self.relate(&source, &id, RelationKind::DataFlow);
        }
        self.guard_dependent(&id);
        self.locals.insert(name.to_string(), id);
    }

    fn effect(&mut self, name: &str, refs: &Refs, line: usize) {
        let id = self.unique(format!("{}::{}@{}", self.func, name, line));
        self.push_element(&id, NodeKind::Effect, line);
        for source in refs.sources().cloned().collect::<Vec<_>>() {
            self.relate(&source, &id, RelationKind::DataFlow);
        }
        self.guard_dependent(&id);
    }

    fn return_site(&mut self, refs: &Refs) {
        if !self.has_return {
            return;
        }
        let ret = format!("{}::return", self.func);
        for source in refs.sources().cloned().collect::<Vec<_>>() {
            self.relate(&source, &ret, RelationKind::DataFlow);
        }
        self.guard_dependent(&ret);
    }

    fn refs_of(&self, expr: &Expr) -> Refs {
        let mut collector = RefCollector {
            index: self.index,
            module: self.module,
            locals: &self.locals,
            refs: Refs::default(),
        };
        collector.visit_expr(expr);
        collector.refs
    }

    fn with_guard(&mut self, predicate: &Expr, body: impl FnOnce(&mut Self)) {
        let refs = self.refs_of(predicate);
        self.visit_expr(predicate);
        self.guards.push(refs.locals.into_iter().collect());
        body(self);
        self.guards.pop();
    }

    /// Call edge to `callee` plus data flow from arguments into its parameters.
    fn call(&mut self, callee: &FunctionSignature, args: &[&Expr]) {
        let func = self.func.clone();
        self.relate(&func, &callee.id, RelationKind::Call);
        for (param, arg) in callee.params.iter().zip(args) {
            let Some(param) = param else {
                continue;
            };
            let target = format!("{}::{}", callee.id, param);
            let refs = self.refs_of(arg);
            for source in refs.sources() {
                self.out
                    .relations
                    .push(Relation::new(source.clone(), target.clone(), RelationKind::DataFlow));
            }
        }
    }
}

impl<'ast> Visit<'ast> for FunctionWalker<'_> {
    // Nested items are walked on their own.
    fn visit_item(&mut self, _: &'ast Item) {}

    fn visit_local(&mut self, local: &'ast syn::Local) {
        let refs = match &local.init {
            Some(init) => {
                let refs = self.refs_of(&init.expr);
                self.visit_expr(&init.expr);
                if let Some((_, diverge)) = &init.diverge {
                    self.visit_expr(diverge);
                }
                refs
            }
            None => Refs::default(),
        };
        let line = local.span().start().line;
        let mut names = Vec::new();
        pattern_idents(&local.pat, &mut names);
        for name in names {
            self.define_local(&name, &refs, line);
        }
    }

    fn visit_expr_assign(&mut self, node: &'ast syn::ExprAssign) {
        match local_name(&node.left) {
            Some(name) => {
                let refs = self.refs_of(&node.right);
                self.visit_expr(&node.right);
                self.define_local(&name, &refs, node.span().start().line);
            }
            None => visit::visit_expr_assign(self, node),
        }
    }

    fn visit_expr_binary(&mut self, node: &'ast syn::ExprBinary) {
        let compound = matches!(
            node.op,
            BinOp::AddAssign(_)
                | BinOp::SubAssign(_)
                | BinOp::MulAssign(_)
                | BinOp::DivAssign(_)
                | BinOp::RemAssign(_)
                | BinOp::BitXorAssign(_)
                | BinOp::BitAndAssign(_)
                | BinOp::BitOrAssign(_)
                | BinOp::ShlAssign(_)
                | BinOp::ShrAssign(_)
        );
        match local_name(&node.left).filter(|_| compound) {
            Some(name) => {
                let mut refs = self.refs_of(&node.right);
                if let Some(previous) = self.locals.get(&name) {
                    refs.locals.insert(previous.clone());
                }
                self.visit_expr(&node.right);
                self.define_local(&name, &refs, node.span().start().line);
            }
            None => visit::visit_expr_binary(self, node),
        }
    }

    fn visit_expr_if(&mut self, node: &'ast syn::ExprIf) {
        self.with_guard(&node.cond, |w| {
            w.visit_block(&node.then_branch);
            if let Some((_, otherwise)) = &node.else_branch {
                w.visit_expr(otherwise);
            }
        });
    }

    fn visit_expr_while(&mut self, node: &'ast syn::ExprWhile) {
        self.with_guard(&node.cond, |w| w.visit_block(&node.body));
    }

    fn visit_expr_match(&mut self, node: &'ast syn::ExprMatch) {
        self.with_guard(&node.expr, |w| {
            for arm in &node.arms {
                if let Some((_, guard)) = &arm.guard {
                    w.visit_expr(guard);
                }
                w.visit_expr(&arm.body);
            }
        });
    }

    fn visit_expr_for_loop(&mut self, node: &'ast syn::ExprForLoop) {
        let refs = self.refs_of(&node.expr);
        self.with_guard(&node.expr, |w| {
            let mut names = Vec::new();
            pattern_idents(&node.pat, &mut names);
            for name in names {
                w.define_local(&name, &refs, node.span().start().line);
            }
            w.visit_block(&node.body);
        });
    }

    fn visit_expr_return(&mut self, node: &'ast syn::ExprReturn) {
        if let Some(expr) = &node.expr {
            let refs = self.refs_of(expr);
            self.visit_expr(expr);
            self.return_site(&refs);
        }
    }

    fn visit_expr_call(&mut self, node: &'ast syn::ExprCall) {
        let segments = call_path(&node.func).unwrap_or_default();
        let args: Vec<&Expr> = node.args.iter().collect();
        let resolved = self.index.resolve_call(&segments, self.module);
        if let Some(callee) = resolved {
            self.call(&callee, &args);
        } else if is_io_path(&segments) {
            let mut refs = Refs::default();
            for arg in &args {
                let more = self.refs_of(arg);
                refs.locals.extend(more.locals);
                refs.returns.extend(more.returns);
            }
            self.effect(&segments.join("::"), &refs, node.span().start().line);
        }
        visit::visit_expr_call(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'ast syn::ExprMethodCall) {
        let name = node.method.to_string();
        let args: Vec<&Expr> = node.args.iter().collect();
        if let Some(callee) = self.index.resolve_method(&name) {
            self.call(&callee, &args);
        } else if IO_METHODS.contains(&name.as_str()) {
            let mut refs = self.refs_of(&node.receiver);
            for arg in &args {
                let more = self.refs_of(arg);
                refs.locals.extend(more.locals);
                refs.returns.extend(more.returns);
            }
            self.effect(&name, &refs, node.span().start().line);
        }
        visit::visit_expr_method_call(self, node);
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        let name = mac
            .path
            .segments
            .last()
            .map(|s| s.ident.to_string())
            .unwrap_or_default();
        let args = macro_args(mac);
        if EFFECT_MACROS.contains(&name.as_str()) {
            let mut refs = Refs::default();
            for arg in &args {
                let more = self.refs_of(arg);
                refs.locals.extend(more.locals);
                refs.returns.extend(more.returns);
                refs.locals.extend(inline_captures(arg, &self.locals));
            }
            self.effect(&format!("{}!", name), &refs, mac.span().start().line);
        }
        for arg in &args {
            self.visit_expr(arg);
        }
    }
}

struct RefCollector<'a> {
    index: &'a FunctionIndex,
    module: &'a str,
    locals: &'a HashMap<String, String>,
    refs: Refs,
}

impl<'ast> Visit<'ast> for RefCollector<'_> {
    fn visit_item(&mut self, _: &'ast Item) {}

    fn visit_expr_path(&mut self, node: &'ast syn::ExprPath) {
        if let Some(id) = node.path.get_ident().and_then(|i| self.locals.get(&i.to_string())) {
            self.refs.locals.insert(id.clone());
        }
    }

    fn visit_expr_call(&mut self, node: &'ast syn::ExprCall) {
        let segments = call_path(&node.func).unwrap_or_default();
        if let Some(callee) = self
            .index
            .resolve_call(&segments, self.module)
            .filter(|c| c.has_return)
        {
            self.refs.returns.insert(format!("{}::return", callee.id));
        }
        visit::visit_expr_call(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'ast syn::ExprMethodCall) {
        if let Some(callee) = self
            .index
            .resolve_method(&node.method.to_string())
            .filter(|c| c.has_return)
        {
            self.refs.returns.insert(format!("{}::return", callee.id));
        }
        visit::visit_expr_method_call(self, node);
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        for arg in macro_args(mac) {
            self.refs.locals.extend(inline_captures(&arg, self.locals));
            self.visit_expr(&arg);
        }
    }
}

fn call_path(func: &Expr) -> Option<Vec<String>> {
    match func {
        Expr::Path(p) => Some(
            p.path
                .segments
                .iter()
                .map(|s| s.ident.to_string())
                .collect(),
        ),
        _ => None,
    }
}

fn is_io_path(segments: &[String]) -> bool {
    segments.len() >= 2
        && segments[..segments.len() - 1]
            .iter()
            .any(|s| IO_PATH_ROOTS.contains(&s.as_str()))
}

fn local_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Path(p) => p.path.get_ident().map(|i| i.to_string()),
        _ => None,
    }
}

fn pattern_idents(pat: &Pat, out: &mut Vec<String>) {
    match pat {
        Pat::Ident(pi) => out.push(pi.ident.to_string()),
        Pat::Type(pt) => pattern_idents(&pt.pat, out),
        Pat::Reference(r) => pattern_idents(&r.pat, out),
        Pat::Tuple(t) => t.elems.iter().for_each(|p| pattern_idents(p, out)),
        Pat::TupleStruct(ts) => ts.elems.iter().for_each(|p| pattern_idents(p, out)),
        Pat::Struct(s) => s.fields.iter().for_each(|f| pattern_idents(&f.pat, out)),
        _ => {}
    }
}

/// Comma-separated expression arguments of a function-like macro, if it has any.
fn macro_args(mac: &syn::Macro) -> Vec<Expr> {
    mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated)
        .map(|args| args.into_iter().collect())
        .unwrap_or_default()
}

/// Locals captured by name in a format string, e.g. `"{total}"` or `"{x:?}"`.
fn inline_captures(arg: &Expr, locals: &HashMap<String, String>) -> Vec<String> {
    let Expr::Lit(syn::ExprLit {
        lit: syn::Lit::Str(s),
        ..
    }) = arg
    else {
        return Vec::new();
    };
    let text = s.value();
    let mut found = Vec::new();
    let mut rest = text.as_str();
    while let Some(open) = rest.find('{') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find('}') else {
            break;
        };
        let name = rest[..close].split(':').next().unwrap_or("").trim();
        if let Some(id) = locals.get(name) {
            found.push(id.clone());
        }
        rest = &rest[close + 1..];
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::builder::GraphBuilder;

    const SHOP: &str = r#"
fn price(qty: u32, unit: u32) -> u32 {
    let total = qty * unit;
    println!("total {}", total);
    total
}

fn checkout(qty: u32) -> u32 {
    let unit = 5;
    let mut due = 0;
    if qty > 10 {
        let bulk = price(qty, unit);
        due = bulk - 1;
    }
    due += 2;
    std::fs::write("receipt.txt", format!("{due}"));
    due
}
"#;

    fn shop() -> ProgramStructure {
        SynElementExtractor::strict()
            .extract(&[SourceFile {
                crate_name: "shop".to_string(),
                path: "src/shop.rs".to_string(),
                content: SHOP.to_string(),
            }])
            .unwrap()
    }

    fn has_relation(s: &ProgramStructure, from: &str, to: &str, kind: RelationKind) -> bool {
        s.relations
            .iter()
            .any(|r| r.source == from && r.target == to && r.kind == kind)
    }

    #[test]
    fn test_elements_and_versions() {
        let s = shop();
        let ids: BTreeSet<&str> = s.elements.iter().map(|e| e.id.as_str()).collect();
        for id in [
            "shop::price",
            "shop::price::qty",
            "shop::price::total",
            "shop::price::return",
            "shop::checkout::unit",
            "shop::checkout::due",
            "shop::checkout::due@2",
            "shop::checkout::due@3",
            "shop::checkout::bulk",
        ] {
            assert!(ids.contains(id), "missing {id}");
        }
        assert!(ids.iter().any(|id| id.starts_with("shop::price::println!@")));
        assert!(ids.iter().any(|id| id.starts_with("shop::checkout::std::fs::write@")));
    }

    #[test]
    fn test_relations() {
        let s = shop();
        assert!(has_relation(&s, "shop::price", "shop::price::qty", RelationKind::DataFlow));
        assert!(has_relation(&s, "shop::price::qty", "shop::price::total", RelationKind::DataFlow));
        assert!(has_relation(&s, "shop::price::total", "shop::price::return", RelationKind::DataFlow));
        assert!(has_relation(&s, "shop::checkout", "shop::price", RelationKind::Call));
        assert!(has_relation(&s, "shop::checkout::unit", "shop::price::unit", RelationKind::DataFlow));
        assert!(has_relation(&s, "shop::price::return", "shop::checkout::bulk", RelationKind::DataFlow));
        assert!(has_relation(&s, "shop::checkout::due@2", "shop::checkout::due@3", RelationKind::DataFlow));
        assert!(has_relation(&s, "shop::checkout::due@3", "shop::checkout::return", RelationKind::DataFlow));
        assert!(s.control_flow.contains(&ControlDependency {
            predicate: "shop::checkout::qty".to_string(),
            dependent: "shop::checkout::bulk".to_string(),
        }));
    }

    #[test]
    fn test_extracted_structure_builds() {
        let s = shop();
        let (graph, report) = GraphBuilder::new()
            .build_with_report(&s.elements, &s.relations, Some(&s.control_flow))
            .unwrap();
        assert!(report.pruned_sinks.iter().any(|id| id.contains("println!")));
        assert!(graph.contains("shop::checkout::return"));
        assert!(graph
            .descendants("shop::checkout::qty")
            .contains("shop::checkout::return"));
    }

    #[test]
    fn test_recursion_is_a_cycle() {
        let s = SynElementExtractor::new()
            .extract(&[SourceFile {
                crate_name: "r".to_string(),
                path: "src/rec.rs".to_string(),
                content: "fn fact(n: u64) -> u64 { if n == 0 { 1 } else { n * fact(n - 1) } }"
                    .to_string(),
            }])
            .unwrap();
        assert!(matches!(
            GraphBuilder::new().build(&s.elements, &s.relations, Some(&s.control_flow)),
            Err(crate::errors::GraphBuildError::CycleDetected { .. })
        ));
    }
}
