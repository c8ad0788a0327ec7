use lex::Span;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ArrayExtent {
    Fixed(u64),
    /// Size expression that is not a plain integer literal, as written.
    Unresolved(String),
    Unsized,
}

impl fmt::Display for ArrayExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayExtent::Fixed(n) => write!(f, "{}", n),
            ArrayExtent::Unresolved(e) => f.write_str(e),
            ArrayExtent::Unsized => Ok(()),
        }
    }
}

/// Type descriptor. Struct, union, enum and typedef names are references;
/// the entity graph resolves them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
    /// Normalized spelling: `int`, `unsigned long`, `long double`, `_Bool`.
    Primitive(String),
    Pointer(Box<Type>),
    Array(Box<Type>, ArrayExtent),
    Struct(String),
    Union(String),
    Enum(String),
    /// typedef-name
    Named(String),
    Func {
        ret: Box<Type>,
        params: Vec<Type>,
        variadic: bool,
    },
    /// Produced by typedef resolution only.
    Unresolved(String),
}

impl Type {
    pub fn int() -> Type {
        Type::Primitive("int".to_string())
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Primitive(p) if p == "void")
    }

    /// No `Unresolved` part anywhere in the type.
    pub fn is_resolved(&self) -> bool {
        match self {
            Type::Unresolved(_) => false,
            Type::Pointer(t) | Type::Array(t, _) => t.is_resolved(),
            Type::Func { ret, params, .. } => ret.is_resolved() && params.iter().all(Type::is_resolved),
            _ => true,
        }
    }

    fn base_name(&self) -> String {
        match self {
            Type::Primitive(p) => p.clone(),
            Type::Struct(n) => format!("struct {}", n),
            Type::Union(n) => format!("union {}", n),
            Type::Enum(n) => format!("enum {}", n),
            Type::Named(n) | Type::Unresolved(n) => n.clone(),
            _ => String::new(),
        }
    }

    /// C spelling of a declaration of `name` with this type, built inside
    /// out: `int (*fp)(int, char *)`, `char name[50]`.
    pub fn declare(&self, name: &str) -> String {
        match self {
            Type::Pointer(inner) => {
                let d = format!("*{}", name);
                if matches!(**inner, Type::Array(..) | Type::Func { .. }) {
                    inner.declare(&format!("({})", d))
                } else {
                    inner.declare(&d)
                }
            }
            Type::Array(inner, ext) => inner.declare(&format!("{}[{}]", name, ext)),
            Type::Func { ret, params, variadic } => {
                let mut list: Vec<String> = params.iter().map(|p| p.declare("")).collect();
                if *variadic {
                    list.push("...".to_string());
                }
                let list = if list.is_empty() { "void".to_string() } else { list.join(", ") };
                ret.declare(&format!("{}({})", name, list))
            }
            base => {
                if name.is_empty() {
                    base.base_name()
                } else {
                    format!("{} {}", base.base_name(), name)
                }
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declare(""))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StorageClass {
    #[default]
    None,
    Static,
    Extern,
    Register,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Qualifiers {
    pub is_const: bool,
    pub is_volatile: bool,
}

impl Qualifiers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn prefix(&self) -> &'static str {
        match (self.is_const, self.is_volatile) {
            (true, true) => "const volatile ",
            (true, false) => "const ",
            (false, true) => "volatile ",
            (false, false) => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: Option<String>,
    pub ty: Type,
    pub quals: Qualifiers,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: Option<String>,
    pub ty: Type,
    /// Bit-field width as written.
    pub bit_width: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumConstant {
    pub name: String,
    /// `None` when an explicit value (or one it depends on) could not be
    /// evaluated.
    pub value: Option<i64>,
    pub explicit: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeclKind {
    Function {
        ret: Type,
        params: Vec<Param>,
        variadic: bool,
        has_body: bool,
        is_inline: bool,
        /// Called identifiers in the body, first-seen order, no duplicates.
        calls: Vec<String>,
    },
    Variable {
        ty: Type,
        init: Option<String>,
    },
    Typedef {
        target: Type,
    },
    /// `fields` is `None` for a forward reference.
    Struct {
        fields: Option<Vec<Field>>,
    },
    Union {
        fields: Option<Vec<Field>>,
    },
    Enum {
        constants: Option<Vec<EnumConstant>>,
    },
    EnumConstant {
        enum_name: String,
        value: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EntityKind {
    Function,
    Variable,
    Typedef,
    Struct,
    Union,
    Enum,
    EnumConstant,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Function => "function",
            EntityKind::Variable => "variable",
            EntityKind::Typedef => "typedef",
            EntityKind::Struct => "struct",
            EntityKind::Union => "union",
            EntityKind::Enum => "enum",
            EntityKind::EnumConstant => "enum constant",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Declaration {
    pub name: String,
    /// False for anonymous struct/union/enum, named `<kind>@<line>:<column>`.
    pub has_explicit_name: bool,
    pub span: Span,
    pub storage: StorageClass,
    pub quals: Qualifiers,
    pub doc: Option<String>,
    pub kind: DeclKind,
}

impl Declaration {
    pub fn entity_kind(&self) -> EntityKind {
        match self.kind {
            DeclKind::Function { .. } => EntityKind::Function,
            DeclKind::Variable { .. } => EntityKind::Variable,
            DeclKind::Typedef { .. } => EntityKind::Typedef,
            DeclKind::Struct { .. } => EntityKind::Struct,
            DeclKind::Union { .. } => EntityKind::Union,
            DeclKind::Enum { .. } => EntityKind::Enum,
            DeclKind::EnumConstant { .. } => EntityKind::EnumConstant,
        }
    }

    /// A definition as opposed to a forward declaration or prototype.
    pub fn is_definition(&self) -> bool {
        match &self.kind {
            DeclKind::Function { has_body, .. } => *has_body,
            DeclKind::Struct { fields } | DeclKind::Union { fields } => fields.is_some(),
            DeclKind::Enum { constants } => constants.is_some(),
            DeclKind::Variable { .. } => self.storage != StorageClass::Extern,
            DeclKind::Typedef { .. } | DeclKind::EnumConstant { .. } => true,
        }
    }
}

/// Parser output for one translation unit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranslationUnit {
    pub declarations: Vec<Declaration>,
    pub diagnostics: Vec<lex::Diagnostic>,
    /// Parsing stopped at a declaration boundary because of cancellation.
    pub cancelled: bool,
}

impl TranslationUnit {
    pub fn find(&self, kind: EntityKind, name: &str) -> Option<&Declaration> {
        self.declarations
            .iter()
            .find(|d| d.entity_kind() == kind && d.name == name)
    }
}
