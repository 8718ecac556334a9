//! The library bundle codec.
//!
//! Serialises the declaration-only subset of a [`TypedUnit`]: function
//! declarations (path, return type, named parameter types, variadic flag),
//! struct declarations (path, member list), and nested `import` nodes, so
//! module structure round-trips. Primitive encoders cover
//! `size`/`bool`/`string`/`Path`/`Type`, and [`lift_unqualified`] applies the
//! seen-roots prefixing rule on import.
//!
//! Each item is length-prefixed after its tag, which is what lets
//! [`import_library`] skip a statement-kind tag it doesn't recognise (spec
//! §6: "Unknown statement tags are skipped... to allow forward-compatible
//! additions") without having to understand its body.

use std::io::{self, Cursor, Read, Write};

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use hashbrown::HashSet;

use crate::hir::{TFnSig, TParam, TStructField, TopDecl, TypedUnit};
use crate::path::Path;
use crate::symbol::{intern, Symbol};
use crate::types::{PrimType, Ty, TyKind, TypeInterner};

const MAGIC: &[u8; 4] = b"TLIB";

const TAG_FN_DECL: u64 = 0;
const TAG_STRUCT: u64 = 1;
const TAG_IMPORT: u64 = 2;

/// Host-level failures reading or writing a bundle: these are
/// genuine Rust errors, distinct from the `Sink`-routed compilation
/// diagnostics every other entry point in §6 uses.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("not a Kiln library bundle (bad magic)")]
    BadMagic,
    #[error("truncated bundle stream")]
    Truncated,
    #[error("bundle uses an unsupported primitive or path encoding")]
    UnsupportedVersion,
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn write_size<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64::<NativeEndian>(v)
}

fn read_size<R: Read>(r: &mut R) -> Result<u64, BundleError> {
    r.read_u64::<NativeEndian>().map_err(|_| BundleError::Truncated)
}

fn write_bool<W: Write>(w: &mut W, b: bool) -> io::Result<()> {
    w.write_u8(u8::from(b))
}

fn read_bool<R: Read>(r: &mut R) -> Result<bool, BundleError> {
    Ok(r.read_u8().map_err(|_| BundleError::Truncated)? != 0)
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_size(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}

fn read_string<R: Read>(r: &mut R) -> Result<String, BundleError> {
    let len = read_size(r)?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).map_err(|_| BundleError::Truncated)?;
    String::from_utf8(buf).map_err(|_| BundleError::UnsupportedVersion)
}

/// Paths are always global by the time they reach the codec (every path
/// that survives to the typed tree has been canonicalised), so — like the
/// original's `serialise(ostream&, Path)` — the `global` flag is not
/// encoded; it is simply always `true` on the way back in.
fn write_path<W: Write>(w: &mut W, path: &Path) -> io::Result<()> {
    write_size(w, path.segments().len() as u64)?;
    for seg in path.segments() {
        write_string(w, seg.as_str())?;
    }
    Ok(())
}

fn read_path<R: Read>(r: &mut R) -> Result<Path, BundleError> {
    let len = read_size(r)?;
    let mut segments = Vec::with_capacity(len as usize);
    for _ in 0..len {
        segments.push(intern(&read_string(r)?));
    }
    Ok(Path::new(segments, true))
}

fn prim_tag(p: PrimType) -> u64 {
    match p {
        PrimType::I8 => 0,
        PrimType::I16 => 1,
        PrimType::I32 => 2,
        PrimType::I64 => 3,
        PrimType::U0 => 4,
        PrimType::U8 => 5,
        PrimType::U16 => 6,
        PrimType::U32 => 7,
        PrimType::U64 => 8,
        PrimType::F32 => 9,
        PrimType::F64 => 10,
        PrimType::Bool => 11,
        PrimType::Str => 12,
        PrimType::Void => 13,
    }
}

fn prim_from_tag(tag: u64) -> Result<PrimType, BundleError> {
    Ok(match tag {
        0 => PrimType::I8,
        1 => PrimType::I16,
        2 => PrimType::I32,
        3 => PrimType::I64,
        4 => PrimType::U0,
        5 => PrimType::U8,
        6 => PrimType::U16,
        7 => PrimType::U32,
        8 => PrimType::U64,
        9 => PrimType::F32,
        10 => PrimType::F64,
        11 => PrimType::Bool,
        12 => PrimType::Str,
        13 => PrimType::Void,
        _ => return Err(BundleError::UnsupportedVersion),
    })
}

/// `type as pointer_level, is_primitive, then either primitive-tag or path`.
fn write_type<W: Write>(w: &mut W, ty: Ty) -> io::Result<()> {
    write_size(w, u64::from(ty.ptr_level()))?;
    match ty.kind() {
        TyKind::Prim(p) => {
            write_bool(w, true)?;
            write_size(w, prim_tag(*p))
        }
        TyKind::User(path) => {
            write_bool(w, false)?;
            write_path(w, path)
        }
        TyKind::Error => {
            // Never reached in practice: a unit with unresolved types never
            // makes it past `analyse`'s error count to `export_library`.
            write_bool(w, true)?;
            write_size(w, prim_tag(PrimType::Void))
        }
    }
}

fn read_type<R: Read>(r: &mut R, interner: &TypeInterner) -> Result<Ty, BundleError> {
    let ptr_level = read_size(r)? as u32;
    let is_primitive = read_bool(r)?;
    let base = if is_primitive {
        interner.prim(prim_from_tag(read_size(r)?)?)
    } else {
        interner.user(read_path(r)?, 0)
    };
    let mut ty = base;
    for _ in 0..ptr_level {
        ty = ty.ref_one();
    }
    Ok(ty)
}

fn write_fn_decl<W: Write>(w: &mut W, sig: &TFnSig) -> io::Result<()> {
    write_path(w, &sig.path)?;
    write_type(w, sig.ret)?;
    write_size(w, sig.params.len() as u64)?;
    for p in &sig.params {
        write_string(w, p.name.as_str())?;
        write_type(w, p.ty)?;
    }
    write_bool(w, sig.variadic)
}

fn read_fn_decl<R: Read>(r: &mut R, interner: &TypeInterner) -> Result<TFnSig, BundleError> {
    let path = read_path(r)?;
    let ret = read_type(r, interner)?;
    let nparams = read_size(r)?;
    let mut params = Vec::with_capacity(nparams as usize);
    for _ in 0..nparams {
        let name = intern(&read_string(r)?);
        let ty = read_type(r, interner)?;
        params.push(TParam { name, ty });
    }
    let variadic = read_bool(r)?;
    Ok(TFnSig { path, params, variadic, ret, range: crate::diag::Range::synthetic(std::rc::Rc::from("<library>")) })
}

fn write_struct<W: Write>(w: &mut W, path: &Path, fields: &[TStructField]) -> io::Result<()> {
    write_path(w, path)?;
    write_size(w, fields.len() as u64)?;
    for f in fields {
        write_string(w, f.name.as_str())?;
        write_type(w, f.ty)?;
    }
    Ok(())
}

fn read_struct<R: Read>(r: &mut R, interner: &TypeInterner) -> Result<(Path, Vec<TStructField>), BundleError> {
    let path = read_path(r)?;
    let nfields = read_size(r)?;
    let mut fields = Vec::with_capacity(nfields as usize);
    for _ in 0..nfields {
        let name = intern(&read_string(r)?);
        let ty = read_type(r, interner)?;
        fields.push(TStructField { name, ty });
    }
    Ok((path, fields))
}

fn write_item<W: Write>(w: &mut W, decl: &TopDecl) -> Result<(), BundleError> {
    let mut body = Vec::new();
    let tag = match decl {
        TopDecl::FnDeclOnly(sig) | TopDecl::FnDef { sig, .. } => {
            // Bodies are never serialised (declaration-only
            // typed subset); a `FnDef` downgrades to its signature alone.
            write_fn_decl(&mut body, sig)?;
            TAG_FN_DECL
        }
        TopDecl::Struct { path, fields, .. } => {
            write_struct(&mut body, path, fields)?;
            TAG_STRUCT
        }
        TopDecl::Import { name, nested } => {
            write_string(&mut body, name.as_str())?;
            write_size(&mut body, nested.len() as u64)?;
            for d in nested {
                write_item(&mut body, d)?;
            }
            TAG_IMPORT
        }
    };
    write_size(w, tag)?;
    write_size(w, body.len() as u64)?;
    w.write_all(&body)?;
    Ok(())
}

fn read_item<R: Read>(r: &mut R, interner: &TypeInterner) -> Result<Option<TopDecl>, BundleError> {
    let tag = read_size(r)?;
    let len = read_size(r)?;
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).map_err(|_| BundleError::Truncated)?;
    let mut cursor = Cursor::new(body);
    match tag {
        TAG_FN_DECL => Ok(Some(TopDecl::FnDeclOnly(read_fn_decl(&mut cursor, interner)?))),
        TAG_STRUCT => {
            let (path, fields) = read_struct(&mut cursor, interner)?;
            Ok(Some(TopDecl::Struct { path, fields, range: crate::diag::Range::synthetic(std::rc::Rc::from("<library>")) }))
        }
        TAG_IMPORT => {
            let name = intern(&read_string(&mut cursor)?);
            let count = read_size(&mut cursor)?;
            let mut nested = Vec::with_capacity(count as usize);
            for _ in 0..count {
                if let Some(d) = read_item(&mut cursor, interner)? {
                    nested.push(d);
                }
            }
            Ok(Some(TopDecl::Import { name, nested }))
        }
        // Unknown tag: already consumed via `len`, so the stream stays in
        // sync and forward-compatible additions are simply dropped (spec
        // §6).
        _ => Ok(None),
    }
}

/// `export_library`: writes the magic, then a length-prefixed
/// list of serialised top-level items.
pub fn export_library<W: Write>(unit: &TypedUnit, writer: &mut W) -> Result<(), BundleError> {
    log::debug!("export_library: {} top-level items", unit.decls.len());
    writer.write_all(MAGIC)?;
    write_size(writer, unit.decls.len() as u64)?;
    for decl in &unit.decls {
        write_item(writer, decl)?;
    }
    Ok(())
}

/// `import_library`: returns the declaration list, skipping any
/// item whose tag this version of the codec doesn't recognise.
pub fn import_library<R: Read>(reader: &mut R, interner: &TypeInterner) -> Result<Vec<TopDecl>, BundleError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(|_| BundleError::Truncated)?;
    if &magic != MAGIC {
        return Err(BundleError::BadMagic);
    }
    let count = read_size(reader)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if let Some(decl) = read_item(reader, interner)? {
            out.push(decl);
        }
    }
    log::debug!("import_library: {} top-level items", out.len());
    Ok(out)
}

fn path_root(path: &Path) -> Option<Symbol> {
    path.segments().first().copied()
}

/// Collects the names of nested `import` scopes — the roots the library
/// itself defines submodules under. A declaration's own multi-segment path
/// does not register its own first segment: that would make every
/// already-qualified path match itself and get re-prefixed.
fn collect_seen_roots(decls: &[TopDecl], seen: &mut HashSet<Symbol>) {
    for decl in decls {
        if let TopDecl::Import { name, nested } = decl {
            seen.insert(*name);
            collect_seen_roots(nested, seen);
        }
    }
}

fn prefix_if_seen(path: &Path, seen: &HashSet<Symbol>, prefix: &Path) -> Path {
    let should_prefix = path.segments().len() == 1 || path_root(path).is_some_and(|r| seen.contains(&r));
    if !should_prefix {
        return path.clone();
    }
    // Not `path.with_prefix(prefix)`: every declaration path a library
    // exports is already global (`read_path` anchors it that way, since
    // analysed paths are always canonical), and `with_prefix` treats a
    // global path as already-anchored and leaves it alone — correct for
    // resolving a reference against the current module, wrong here, where
    // the path being lifted is the thing that needs the new anchor.
    Path::new(prefix.segments().iter().chain(path.segments()).copied(), true)
}

fn prefix_ty(ty: Ty, seen: &HashSet<Symbol>, prefix: &Path, interner: &TypeInterner) -> Ty {
    let Some(path) = ty.user_path() else { return ty };
    interner.user(prefix_if_seen(path, seen, prefix), ty.ptr_level())
}

/// On import, lifts unqualified user-type references and declared function
/// paths under `prefix`: only names that were
/// multi-segment within the library, or that name something the library
/// itself defines, get the prefix; a single-segment name referring to
/// another library's root is left alone.
#[must_use]
pub fn lift_unqualified(decls: Vec<TopDecl>, prefix: &Path, interner: &TypeInterner) -> Vec<TopDecl> {
    let mut seen = HashSet::new();
    collect_seen_roots(&decls, &mut seen);
    lift_rec(decls, &seen, prefix, interner)
}

fn lift_rec(decls: Vec<TopDecl>, seen: &HashSet<Symbol>, prefix: &Path, interner: &TypeInterner) -> Vec<TopDecl> {
    decls
        .into_iter()
        .map(|decl| match decl {
            TopDecl::FnDeclOnly(mut sig) => {
                sig.path = prefix_if_seen(&sig.path, seen, prefix);
                sig.ret = prefix_ty(sig.ret, seen, prefix, interner);
                for p in &mut sig.params {
                    p.ty = prefix_ty(p.ty, seen, prefix, interner);
                }
                TopDecl::FnDeclOnly(sig)
            }
            TopDecl::FnDef { mut sig, body } => {
                sig.path = prefix_if_seen(&sig.path, seen, prefix);
                sig.ret = prefix_ty(sig.ret, seen, prefix, interner);
                for p in &mut sig.params {
                    p.ty = prefix_ty(p.ty, seen, prefix, interner);
                }
                TopDecl::FnDef { sig, body }
            }
            TopDecl::Struct { path, mut fields, range } => {
                let path = prefix_if_seen(&path, seen, prefix);
                for f in &mut fields {
                    f.ty = prefix_ty(f.ty, seen, prefix, interner);
                }
                TopDecl::Struct { path, fields, range }
            }
            TopDecl::Import { name, nested } => TopDecl::Import { name, nested: lift_rec(nested, seen, prefix, interner) },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Range;
    use std::rc::Rc;

    fn r() -> Range {
        Range::synthetic(Rc::from("t.kl"))
    }

    fn sample_unit(interner: &TypeInterner) -> TypedUnit {
        let i32t = interner.prim(PrimType::I32);
        let fn_path = Path::root().append(intern("add"));
        let sig = TFnSig {
            path: fn_path,
            params: vec![TParam { name: intern("a"), ty: i32t }, TParam { name: intern("b"), ty: i32t }],
            variadic: false,
            ret: i32t,
            range: r(),
        };
        let struct_path = Path::root().append(intern("Point"));
        TypedUnit {
            decls: vec![
                TopDecl::FnDeclOnly(sig),
                TopDecl::Struct {
                    path: struct_path,
                    fields: vec![TStructField { name: intern("x"), ty: i32t }, TStructField { name: intern("y"), ty: i32t }],
                    range: r(),
                },
                TopDecl::Import { name: intern("util"), nested: vec![] },
            ],
        }
    }

    #[test]
    fn round_trip_preserves_declaration_shape() {
        let interner = TypeInterner::new();
        let unit = sample_unit(&interner);
        let mut buf = Vec::new();
        export_library(&unit, &mut buf).unwrap();
        assert_eq!(&buf[0..4], MAGIC);
        let decls = import_library(&mut Cursor::new(buf), &interner).unwrap();
        assert_eq!(decls.len(), 3);
        assert!(matches!(&decls[0], TopDecl::FnDeclOnly(sig) if sig.params.len() == 2));
        assert!(matches!(&decls[1], TopDecl::Struct { fields, .. } if fields.len() == 2));
        assert!(matches!(&decls[2], TopDecl::Import { nested, .. } if nested.is_empty()));
    }

    #[test]
    fn double_round_trip_is_byte_identical() {
        let interner = TypeInterner::new();
        let unit = sample_unit(&interner);
        let mut first = Vec::new();
        export_library(&unit, &mut first).unwrap();
        let decls = import_library(&mut Cursor::new(first.clone()), &interner).unwrap();
        let reimported = TypedUnit { decls };
        let mut second = Vec::new();
        export_library(&reimported, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let interner = TypeInterner::new();
        let mut buf = vec![b'N', b'O', b'P', b'E'];
        buf.extend_from_slice(&0u64.to_ne_bytes());
        assert!(matches!(import_library(&mut Cursor::new(buf), &interner), Err(BundleError::BadMagic)));
    }

    #[test]
    fn unknown_tag_is_skipped() {
        let interner = TypeInterner::new();
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        write_size(&mut buf, 1).unwrap();
        write_size(&mut buf, 99).unwrap(); // unrecognised tag
        write_size(&mut buf, 4).unwrap();
        buf.extend_from_slice(&[1, 2, 3, 4]);
        let decls = import_library(&mut Cursor::new(buf), &interner).unwrap();
        assert!(decls.is_empty());
    }

    #[test]
    fn single_segment_path_is_prefixed_but_foreign_root_is_not() {
        let interner = TypeInterner::new();
        let prefix = Path::root().append(intern("mylib"));
        let local_fn = TFnSig { path: Path::single(intern("helper")), params: vec![], variadic: false, ret: interner.void(), range: r() };
        let foreign_ty = interner.user(Path::root().append(intern("other")).append(intern("Thing")), 0);
        let foreign_fn = TFnSig {
            path: Path::root().append(intern("other")).append(intern("frob")),
            params: vec![TParam { name: intern("t"), ty: foreign_ty }],
            variadic: false,
            ret: interner.void(),
            range: r(),
        };
        let decls = vec![TopDecl::FnDeclOnly(local_fn), TopDecl::FnDeclOnly(foreign_fn)];
        let lifted = lift_unqualified(decls, &prefix, &interner);
        let TopDecl::FnDeclOnly(a) = &lifted[0] else { panic!() };
        assert_eq!(a.path.to_string(), "::mylib.helper");
        let TopDecl::FnDeclOnly(b) = &lifted[1] else { panic!() };
        assert_eq!(b.path.to_string(), "::other.frob");
    }

    /// Every declaration path `analyse` actually produces is already
    /// root-anchored (`read_path` / `collect_signatures` both build via
    /// `Path::root().append(..)`), not the bare `Path::single` the test
    /// above uses. `with_prefix` alone would leave a global path untouched,
    /// so this pins `prefix_if_seen` to lift a real, global, single-segment
    /// declaration path the same way.
    #[test]
    fn global_single_segment_declaration_path_is_still_prefixed() {
        let interner = TypeInterner::new();
        let prefix = Path::root().append(intern("mathlib"));
        let add_fn = TFnSig { path: Path::root().append(intern("add")), params: vec![], variadic: false, ret: interner.void(), range: r() };
        let lifted = lift_unqualified(vec![TopDecl::FnDeclOnly(add_fn)], &prefix, &interner);
        let TopDecl::FnDeclOnly(a) = &lifted[0] else { panic!() };
        assert_eq!(a.path.to_string(), "::mathlib.add");
    }
}
