//! Capability allow-list for submitted scripts.
//!
//! A script sees exactly two kinds of global names:
//!
//! - **Capabilities**: host functions implemented here (`print`, `range`).
//! - **Intrinsics**: engine built-ins (`Math`, `JSON`, ...) that the list
//!   names explicitly.
//!
//! Every other global is deleted from a fresh context before user code runs,
//! so referencing it fails with a `ReferenceError`. The engine itself has no
//! file, network, or process bindings. This is a name-level boundary only:
//! it does not constrain CPU or memory beyond the limits in
//! [`ScriptLimits`](crate::ScriptLimits).

use std::collections::BTreeSet;

use boa_engine::gc::{Gc, GcRefCell};
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::object::builtins::JsArray;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source};
use serde::{Deserialize, Serialize};

/// Longest sequence `range` will materialize.
pub const MAX_RANGE_LEN: u64 = 1_000_000;

/// Engine intrinsics enabled by [`CapabilityAllowList::with_standard_library`].
pub const STANDARD_INTRINSICS: &[&str] = &[
    "Array",
    "Boolean",
    "JSON",
    "Math",
    "Number",
    "Object",
    "String",
    "isFinite",
    "isNaN",
    "parseFloat",
    "parseInt",
];

/// A host function a script may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// `print(...args)`: writes the space-joined arguments and a newline to
    /// the captured output.
    Print,
    /// `range(stop)` / `range(start, stop[, step])`: returns an array of
    /// integers.
    Range,
}

impl Capability {
    /// The global name the capability is bound to.
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Print => "print",
            Capability::Range => "range",
        }
    }
}

/// The fixed set of names a script may reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityAllowList {
    capabilities: BTreeSet<Capability>,
    intrinsics: BTreeSet<String>,
}

impl Default for CapabilityAllowList {
    /// `print` and `range`, no intrinsics.
    fn default() -> Self {
        Self {
            capabilities: [Capability::Print, Capability::Range].into_iter().collect(),
            intrinsics: BTreeSet::new(),
        }
    }
}

impl CapabilityAllowList {
    /// An allow-list with nothing in it.
    pub fn empty() -> Self {
        Self {
            capabilities: BTreeSet::new(),
            intrinsics: BTreeSet::new(),
        }
    }

    /// Add a host capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Remove a host capability.
    pub fn without_capability(mut self, capability: Capability) -> Self {
        self.capabilities.remove(&capability);
        self
    }

    /// Keep an engine intrinsic (e.g. `"Math"`) visible to scripts.
    pub fn with_intrinsic(mut self, name: impl Into<String>) -> Self {
        self.intrinsics.insert(name.into());
        self
    }

    /// Keep the side-effect-free intrinsics listed in [`STANDARD_INTRINSICS`].
    pub fn with_standard_library(mut self) -> Self {
        self.intrinsics
            .extend(STANDARD_INTRINSICS.iter().map(|s| (*s).to_string()));
        self
    }

    /// Whether `name` is reachable from a script.
    pub fn permits(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name() == name) || self.intrinsics.contains(name)
    }

    /// All permitted global names, capabilities first.
    pub fn names(&self) -> Vec<String> {
        self.capabilities
            .iter()
            .map(|c| c.name().to_string())
            .chain(self.intrinsics.iter().cloned())
            .collect()
    }

    /// Strip `context` down to this allow-list and bind the capabilities.
    ///
    /// `output` receives everything `print` writes; `max_output_bytes` caps
    /// it, after which `print` throws.
    pub(crate) fn install(
        &self,
        context: &mut Context,
        output: &Gc<GcRefCell<String>>,
        max_output_bytes: usize,
    ) -> JsResult<()> {
        self.strip_globals(context)?;

        for capability in &self.capabilities {
            let function = match capability {
                Capability::Print => print_function(output.clone(), max_output_bytes),
                Capability::Range => NativeFunction::from_fn_ptr(range),
            };
            let object = FunctionObjectBuilder::new(context.realm(), function)
                .name(JsString::from(capability.name()))
                .length(0)
                .constructor(false)
                .build();
            context.register_global_property(
                JsString::from(capability.name()),
                object,
                Attribute::ENUMERABLE,
            )?;
        }

        Ok(())
    }

    fn strip_globals(&self, context: &mut Context) -> JsResult<()> {
        let keep = serde_json::to_string(&self.intrinsics.iter().collect::<Vec<_>>())
            .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;

        // Non-configurable globals (`undefined`, `NaN`, `Infinity`) survive the
        // delete; they carry no capability.
        let prelude = format!(
            r#"(function (keep) {{
    var global = globalThis;
    var names = Object.getOwnPropertyNames(global);
    for (var i = 0; i < names.length; i++) {{
        if (keep.indexOf(names[i]) === -1) {{
            try {{ delete global[names[i]]; }} catch (e) {{}}
        }}
    }}
}})({keep});"#
        );

        context.eval(Source::from_bytes(prelude.as_bytes()))?;
        Ok(())
    }
}

fn print_function(output: Gc<GcRefCell<String>>, limit: usize) -> NativeFunction {
    NativeFunction::from_copy_closure_with_captures(
        move |_this, args, output: &Gc<GcRefCell<String>>, context| {
            let mut line = String::new();
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    line.push(' ');
                }
                line.push_str(&arg.to_string(context)?.to_std_string_escaped());
            }
            line.push('\n');

            let mut buffer = output.borrow_mut();
            if buffer.len() + line.len() > limit {
                return Err(JsNativeError::range()
                    .with_message(format!("output limit of {limit} bytes exceeded"))
                    .into());
            }
            buffer.push_str(&line);
            Ok(JsValue::undefined())
        },
        output,
    )
}

fn range(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let mut bounds = Vec::with_capacity(args.len());
    for arg in args.iter().take(3) {
        bounds.push(integer_arg(arg, context)?);
    }

    let (start, stop, step) = match bounds.as_slice() {
        [] => {
            return Err(JsNativeError::typ()
                .with_message("range expected at least 1 argument, got 0")
                .into());
        }
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step, ..] => (*start, *stop, *step),
    };

    if step == 0 {
        return Err(JsNativeError::range()
            .with_message("range() arg 3 must not be zero")
            .into());
    }

    let len = range_len(start, stop, step);
    if len > u128::from(MAX_RANGE_LEN) {
        return Err(JsNativeError::range()
            .with_message(format!("range() longer than {MAX_RANGE_LEN} elements"))
            .into());
    }

    let values = (0..len as i64).map(|i| JsValue::from(start + i * step));
    Ok(JsArray::from_iter(values, context).into())
}

fn integer_arg(value: &JsValue, context: &mut Context) -> JsResult<i64> {
    let number = value.to_number(context)?;
    if !number.is_finite() || number.fract() != 0.0 || number.abs() > (1u64 << 53) as f64 {
        return Err(JsNativeError::typ()
            .with_message(format!(
                "range() arguments must be integers, got {}",
                value.display()
            ))
            .into());
    }
    Ok(number as i64)
}

fn range_len(start: i64, stop: i64, step: i64) -> u128 {
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    if step > 0 && start < stop {
        ((stop - start + step - 1) / step) as u128
    } else if step < 0 && start > stop {
        ((start - stop - step - 1) / -step) as u128
    } else {
        0
    }
}
