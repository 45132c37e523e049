use dashmap::DashMap;
use rayon::prelude::*;
use syn::{FnArg, Item, Pat, ReturnType, Type};

use crate::domain::element::SourceFile;
use crate::errors::ExtractError;

/// What call sites need to know about a function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    /// Element id, `module::name` or `module::Type::name`.
    pub id: String,
    pub name: String,
    /// Parameter names in declaration order; `None` for patterns that bind no single name.
    pub params: Vec<Option<String>>,
    pub has_return: bool,
    pub is_method: bool,
    pub location: String,
}

/// Thread-safe function index built in parallel across source files.
#[derive(Default)]
pub struct FunctionIndex {
    // Key: element id
    functions: DashMap<String, FunctionSignature>,
    // Acceleration map: simple name -> element ids
    by_name: DashMap<String, Vec<String>>,
}

/// Module prefix used for element ids of a file.
pub fn module_of(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string())
}

impl FunctionIndex {
    /// Index every function and method of `sources`.
    ///
    /// Files that fail to parse are skipped with a warning unless `strict`.
    /// When two files produce the same id, the one from the file sorted first wins.
    pub fn build(sources: &[SourceFile], strict: bool) -> Result<Self, ExtractError> {
        let per_file: Vec<Result<Vec<FunctionSignature>, ExtractError>> = sources
            .par_iter()
            .map(|file| match syn::parse_file(&file.content) {
                Ok(ast) => {
                    let mut out = Vec::new();
                    collect_items(&module_of(&file.path), &file.path, &ast.items, &mut out);
                    Ok(out)
                }
                Err(e) => Err(ExtractError::Parse {
                    path: file.path.clone(),
                    message: e.to_string(),
                }),
            })
            .collect();

        let index = FunctionIndex::default();
        for result in per_file {
            let signatures = match result {
                Ok(signatures) => signatures,
                Err(e) if strict => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparsable source");
                    continue;
                }
            };
            for sig in signatures {
                if index.functions.contains_key(&sig.id) {
                    tracing::warn!(id = %sig.id, location = %sig.location, "duplicate function id ignored");
                    continue;
                }
                index
                    .by_name
                    .entry(sig.name.clone())
                    .or_default()
                    .push(sig.id.clone());
                index.functions.insert(sig.id.clone(), sig);
            }
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Returns a clone to avoid holding DashMap locks.
    pub fn get(&self, id: &str) -> Option<FunctionSignature> {
        self.functions.get(id).map(|r| r.clone())
    }

    /// All signatures, sorted by id.
    pub fn signatures(&self) -> Vec<FunctionSignature> {
        let mut all: Vec<FunctionSignature> =
            self.functions.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Resolve a call path conservatively: only a single matching candidate counts.
    ///
    /// `segments` is the call path (`["helper"]`, `["Cart", "new"]`); `module`
    /// is the caller's module, preferred for unqualified names.
    pub fn resolve_call(&self, segments: &[String], module: &str) -> Option<FunctionSignature> {
        let name = segments.last()?;
        let candidates = self.by_name.get(name)?.clone();
        let pick = |filtered: Vec<&String>| match filtered.as_slice() {
            [only] => self.get(only),
            _ => None,
        };

        if segments.len() >= 2 {
            let suffix = format!("::{}::{}", segments[segments.len() - 2], name);
            let local = format!("{}::{}", module, name);
            return pick(
                candidates
                    .iter()
                    .filter(|id| id.ends_with(&suffix) || **id == local)
                    .collect(),
            );
        }
        let local = format!("{}::{}", module, name);
        if let Some(sig) = self.get(&local) {
            return Some(sig);
        }
        pick(
            candidates
                .iter()
                .filter(|id| self.get(id).is_some_and(|s| !s.is_method))
                .collect(),
        )
    }

    /// Resolve `receiver.name(..)`: the unique method with that name, if any.
    pub fn resolve_method(&self, name: &str) -> Option<FunctionSignature> {
        let candidates = self.by_name.get(name)?;
        let methods: Vec<FunctionSignature> = candidates
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|s| s.is_method)
            .collect();
        match methods.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }
}

fn signature(prefix: &str, path: &str, sig: &syn::Signature, is_method: bool) -> FunctionSignature {
    let name = sig.ident.to_string();
    let params = sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Receiver(_) => None,
            FnArg::Typed(pt) => Some(match &*pt.pat {
                Pat::Ident(pi) => Some(pi.ident.to_string()),
                _ => None,
            }),
        })
        .collect();
    FunctionSignature {
        id: format!("{}::{}", prefix, name),
        name,
        params,
        has_return: !matches!(sig.output, ReturnType::Default),
        is_method,
        location: format!("{}:{}", path, sig.ident.span().start().line),
    }
}

/// Index all items in a list (recursive for inline modules).
fn collect_items(prefix: &str, path: &str, items: &[Item], out: &mut Vec<FunctionSignature>) {
    for item in items {
        match item {
            Item::Fn(func) => out.push(signature(prefix, path, &func.sig, false)),
            Item::Impl(imp) => {
                let Type::Path(tp) = &*imp.self_ty else {
                    continue;
                };
                let Some(segment) = tp.path.segments.last() else {
                    continue;
                };
                let type_prefix = format!("{}::{}", prefix, segment.ident);
                for impl_item in &imp.items {
                    if let syn::ImplItem::Fn(method) = impl_item {
                        out.push(signature(&type_prefix, path, &method.sig, true));
                    }
                }
            }
            Item::Mod(module) => {
                if let Some((_, content)) = &module.content {
                    let nested = format!("{}::{}", prefix, module.ident);
                    collect_items(&nested, path, content, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(path: &str, content: &str) -> SourceFile {
        SourceFile {
            crate_name: "demo".to_string(),
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_index_functions_and_methods() {
        let index = FunctionIndex::build(
            &[source(
                "src/orders.rs",
                r#"
                fn subtotal(qty: u32, (a, b): (u32, u32)) -> u32 { qty }
                struct Cart;
                impl Cart {
                    fn total(&self, tax: f64) -> f64 { tax }
                    fn clear(&mut self) {}
                }
                mod inner { fn helper() {} }
                "#,
            )],
            true,
        )
        .unwrap();

        assert_eq!(index.len(), 4);
        let sub = index.get("orders::subtotal").unwrap();
        assert_eq!(sub.params, vec![Some("qty".to_string()), None]);
        assert!(sub.has_return);
        let total = index.get("orders::Cart::total").unwrap();
        assert!(total.is_method);
        assert_eq!(total.params, vec![Some("tax".to_string())]);
        assert!(!index.get("orders::Cart::clear").unwrap().has_return);
        assert!(index.get("orders::inner::helper").is_some());
    }

    #[test]
    fn test_resolution_is_conservative() {
        let index = FunctionIndex::build(
            &[
                source("src/a.rs", "fn run() {} fn only_a() {} struct S; impl S { fn go(&self) {} }"),
                source("src/b.rs", "fn run() {} struct T; impl T { fn go(&self) {} fn stop(&self) {} }"),
            ],
            true,
        )
        .unwrap();

        let call = |segs: &[&str], module: &str| {
            index
                .resolve_call(&segs.iter().map(|s| s.to_string()).collect::<Vec<_>>(), module)
                .map(|s| s.id)
        };
        assert_eq!(call(&["run"], "a"), Some("a::run".to_string()));
        assert_eq!(call(&["run"], "c"), None);
        assert_eq!(call(&["only_a"], "b"), Some("a::only_a".to_string()));
        assert_eq!(call(&["T", "go"], "a"), Some("b::T::go".to_string()));
        assert!(index.resolve_method("go").is_none());
        assert_eq!(index.resolve_method("stop").unwrap().id, "b::T::stop");
    }

    #[test]
    fn test_parse_errors() {
        let files = [source("src/bad.rs", "fn broken( {"), source("src/ok.rs", "fn fine() {}")];
        assert!(matches!(
            FunctionIndex::build(&files, true),
            Err(ExtractError::Parse { .. })
        ));
        let lenient = FunctionIndex::build(&files, false).unwrap();
        assert_eq!(lenient.len(), 1);
    }
}
