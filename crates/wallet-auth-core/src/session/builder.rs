//! Fluent builder for call permissions
//!
//! Parameter rules are placed at the ABI offsets of the function parsed with
//! [`PermissionBuilder::for_function`], so callers constrain arguments by
//! name or position instead of computing offsets by hand.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wallet_auth_core::session::{PermissionBuilder, ParameterOperation};
//!
//! let permission = PermissionBuilder::for_target(token)
//!     .for_function("transfer(address to, uint256 value)")?
//!     .with_uint_n_param("value", limit, 256, ParameterOperation::LessThanOrEqual, true)?
//!     .build()?;
//! ```

use super::permission::{MAX_RULES, ParameterOperation, ParameterRule, Permission, mask};
use crate::{Error, Result};
use alloy_dyn_abi::DynSolType;
use alloy_json_abi::Function;
use alloy_primitives::{Address, B256, I256, U256};

/// Reference to a function parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRef {
    /// Parameter name as written in the signature
    Name(String),
    /// Zero-based parameter position
    Index(usize),
}

impl From<&str> for ParamRef {
    fn from(name: &str) -> Self {
        ParamRef::Name(name.to_string())
    }
}

impl From<String> for ParamRef {
    fn from(name: String) -> Self {
        ParamRef::Name(name)
    }
}

impl From<usize> for ParamRef {
    fn from(index: usize) -> Self {
        ParamRef::Index(index)
    }
}

impl std::fmt::Display for ParamRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamRef::Name(name) => write!(f, "\"{}\"", name),
            ParamRef::Index(index) => write!(f, "#{}", index),
        }
    }
}

#[derive(Debug, Clone)]
struct AbiParam {
    name: String,
    type_name: String,
    ty: DynSolType,
    /// Offset of the parameter's head slot, relative to the argument area
    head: usize,
}

#[derive(Debug, Clone)]
struct FunctionLayout {
    params: Vec<AbiParam>,
    /// Total size of the head section
    head_size: usize,
}

impl FunctionLayout {
    fn from_function(function: &Function) -> Result<Self> {
        let mut params = Vec::with_capacity(function.inputs.len());
        let mut head = 0;
        for input in &function.inputs {
            let type_name = input.selector_type().into_owned();
            let ty = DynSolType::parse(&type_name).map_err(|e| {
                Error::builder(format!("unsupported parameter type {}: {}", type_name, e))
            })?;
            let size = head_size(&ty);
            params.push(AbiParam {
                name: input.name.clone(),
                type_name,
                ty,
                head,
            });
            head += size;
        }
        Ok(Self {
            params,
            head_size: head,
        })
    }

    fn resolve(&self, param: &ParamRef) -> Result<&AbiParam> {
        let found = match param {
            ParamRef::Name(name) => self.params.iter().find(|p| &p.name == name),
            ParamRef::Index(index) => self.params.get(*index),
        };
        found.ok_or_else(|| Error::builder(format!("unknown parameter {}", param)))
    }
}

/// Whether a type is encoded in the tail, behind an offset pointer
fn is_dynamic(ty: &DynSolType) -> bool {
    match ty {
        DynSolType::String | DynSolType::Bytes | DynSolType::Array(_) => true,
        DynSolType::FixedArray(inner, _) => is_dynamic(inner),
        DynSolType::Tuple(items) => items.iter().any(is_dynamic),
        _ => false,
    }
}

/// Size of a type's slot in the ABI head section
fn head_size(ty: &DynSolType) -> usize {
    if is_dynamic(ty) {
        return 32;
    }
    match ty {
        DynSolType::FixedArray(inner, len) => head_size(inner) * len,
        DynSolType::Tuple(items) => items.iter().map(head_size).sum(),
        _ => 32,
    }
}

fn check_bits(bits: usize) -> Result<()> {
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(Error::builder(format!("invalid bit size {}", bits)));
    }
    Ok(())
}

/// Left-aligned word holding `bytes` (at most 32)
fn left_word(bytes: &[u8]) -> B256 {
    let mut word = [0u8; 32];
    word[..bytes.len()].copy_from_slice(bytes);
    B256::new(word)
}

fn u256_word(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<32>())
}

/// Stateful builder for a [`Permission`]
#[derive(Debug, Clone)]
pub struct PermissionBuilder {
    target: Address,
    rules: Vec<ParameterRule>,
    layout: Option<FunctionLayout>,
    allow_all: bool,
    exact_calldata: bool,
}

impl PermissionBuilder {
    /// Start a permission for calls to `target`
    pub fn for_target(target: Address) -> Self {
        Self {
            target,
            rules: Vec::new(),
            layout: None,
            allow_all: false,
            exact_calldata: false,
        }
    }

    /// Allow any call to the target
    pub fn allow_all(mut self) -> Result<Self> {
        if !self.rules.is_empty() {
            return Err(Error::builder("cannot call allowAll() after adding rules"));
        }
        self.allow_all = true;
        Ok(self)
    }

    /// Allow exactly one call data value
    ///
    /// Emits one EQUAL rule per 32-byte chunk; a short final chunk is matched
    /// under a partial mask.
    pub fn exact_calldata(mut self, call_data: &[u8]) -> Result<Self> {
        if self.allow_all || !self.rules.is_empty() {
            return Err(Error::builder(
                "cannot call exactCalldata() after calling allowAll() or adding rules",
            ));
        }
        for (i, chunk) in call_data.chunks(32).enumerate() {
            self.rules.push(ParameterRule::new(
                ParameterOperation::Equal,
                left_word(chunk),
                (i * 32) as u64,
                mask::bytes(chunk.len()),
            ));
        }
        self.exact_calldata = true;
        Ok(self)
    }

    /// Restrict calls to a function given as a human-readable signature
    pub fn for_function(self, signature: &str) -> Result<Self> {
        let function = Function::parse(signature).map_err(|e| {
            Error::builder(format!("invalid function signature {}: {}", signature, e))
        })?;
        self.for_abi_function(&function)
    }

    /// Restrict calls to a parsed ABI function
    pub fn for_abi_function(mut self, function: &Function) -> Result<Self> {
        if self.allow_all || self.exact_calldata {
            return Err(Error::builder(
                "cannot call forFunction(...) after calling allowAll() or exactCalldata()",
            ));
        }
        if self.layout.is_some() {
            return Err(Error::builder("cannot call forFunction(...) twice"));
        }
        let layout = FunctionLayout::from_function(function)?;
        self.rules.push(ParameterRule::new(
            ParameterOperation::Equal,
            left_word(function.selector().as_slice()),
            0,
            mask::SELECTOR,
        ));
        self.layout = Some(layout);
        Ok(self)
    }

    fn param(&self, param: &ParamRef) -> Result<&AbiParam> {
        self.layout
            .as_ref()
            .ok_or_else(|| Error::builder("must call forFunction(...) first"))?
            .resolve(param)
    }

    fn static_param(
        &self,
        param: &ParamRef,
        accepts: impl Fn(&DynSolType) -> bool,
        expected: &str,
    ) -> Result<u64> {
        let abi = self.param(param)?;
        if !accepts(&abi.ty) {
            return Err(Error::builder(format!(
                "parameter {} has type {}, expected {}",
                param, abi.type_name, expected
            )));
        }
        Ok(4 + abi.head as u64)
    }

    fn push_rule(
        mut self,
        offset: u64,
        value: B256,
        mask: B256,
        operation: ParameterOperation,
        cumulative: bool,
    ) -> Self {
        self.rules.push(ParameterRule {
            cumulative,
            operation,
            value,
            offset: U256::from(offset),
            mask,
        });
        self
    }

    /// Constrain a `uintN` parameter
    pub fn with_uint_n_param(
        self,
        param: impl Into<ParamRef>,
        value: U256,
        bits: usize,
        operation: ParameterOperation,
        cumulative: bool,
    ) -> Result<Self> {
        check_bits(bits)?;
        let param = param.into();
        let offset = self.static_param(&param, |t| matches!(t, DynSolType::Uint(_)), "uint")?;
        Ok(self.push_rule(offset, u256_word(value), mask::uint(bits), operation, cumulative))
    }

    /// Constrain an `intN` parameter
    ///
    /// The value is compared as its two's complement word, so ordering
    /// operations only make sense between values of the same sign.
    pub fn with_int_n_param(
        self,
        param: impl Into<ParamRef>,
        value: I256,
        bits: usize,
        operation: ParameterOperation,
        cumulative: bool,
    ) -> Result<Self> {
        check_bits(bits)?;
        let param = param.into();
        let offset = self.static_param(&param, |t| matches!(t, DynSolType::Int(_)), "int")?;
        let word = u256_word(value.into_raw()) & mask::int(bits);
        Ok(self.push_rule(offset, word, mask::int(bits), operation, cumulative))
    }

    /// Constrain an `address` parameter
    pub fn with_address_param(
        self,
        param: impl Into<ParamRef>,
        value: Address,
        operation: ParameterOperation,
        cumulative: bool,
    ) -> Result<Self> {
        let param = param.into();
        let offset =
            self.static_param(&param, |t| matches!(t, DynSolType::Address), "address")?;
        Ok(self.push_rule(offset, value.into_word(), mask::ADDRESS, operation, cumulative))
    }

    /// Constrain a `bool` parameter
    pub fn with_bool_param(
        self,
        param: impl Into<ParamRef>,
        value: bool,
        operation: ParameterOperation,
        cumulative: bool,
    ) -> Result<Self> {
        let param = param.into();
        let offset = self.static_param(&param, |t| matches!(t, DynSolType::Bool), "bool")?;
        Ok(self.push_rule(
            offset,
            u256_word(U256::from(value as u8)),
            mask::BOOL,
            operation,
            cumulative,
        ))
    }

    /// Constrain a `bytesN` parameter; `value` is left-aligned
    pub fn with_bytes_n_param(
        self,
        param: impl Into<ParamRef>,
        value: &[u8],
        size: usize,
        operation: ParameterOperation,
        cumulative: bool,
    ) -> Result<Self> {
        if size == 0 || size > 32 || value.len() > size {
            return Err(Error::builder(format!(
                "invalid bytes{} value of {} bytes",
                size,
                value.len()
            )));
        }
        let param = param.into();
        let offset = self.static_param(
            &param,
            |t| matches!(t, DynSolType::FixedBytes(n) if *n == size),
            &format!("bytes{}", size),
        )?;
        Ok(self.push_rule(offset, left_word(value), mask::bytes(size), operation, cumulative))
    }

    /// Require a `string` parameter to equal `value`
    pub fn with_string_param(self, param: impl Into<ParamRef>, value: &str) -> Result<Self> {
        self.with_dynamic_param(param.into(), value.as_bytes(), |t| {
            matches!(t, DynSolType::String)
        })
    }

    /// Require a `bytes` parameter to equal `value`
    pub fn with_bytes_param(self, param: impl Into<ParamRef>, value: &[u8]) -> Result<Self> {
        self.with_dynamic_param(param.into(), value, |t| matches!(t, DynSolType::Bytes))
    }

    /// Pointer, length and content rules for a dynamic parameter
    ///
    /// The tail position is only predictable when no other parameter is
    /// dynamic; the tail then starts right after the head section.
    fn with_dynamic_param(
        mut self,
        param: ParamRef,
        value: &[u8],
        accepts: impl Fn(&DynSolType) -> bool,
    ) -> Result<Self> {
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| Error::builder("must call forFunction(...) first"))?;
        let abi = layout.resolve(&param)?;
        if !accepts(&abi.ty) {
            return Err(Error::builder(format!(
                "parameter {} has type {}, expected a dynamic string or bytes",
                param, abi.type_name
            )));
        }
        if layout.params.iter().filter(|p| is_dynamic(&p.ty)).count() > 1 {
            return Err(Error::builder(format!(
                "dynamic parameter {} must be the only dynamic function parameter",
                param
            )));
        }
        let pointer_offset = 4 + abi.head as u64;
        let pointer = layout.head_size as u64;
        let length_offset = 4 + pointer;

        self = self.push_rule(
            pointer_offset,
            u256_word(U256::from(pointer)),
            mask::UINT256,
            ParameterOperation::Equal,
            false,
        );
        self = self.push_rule(
            length_offset,
            u256_word(U256::from(value.len())),
            mask::UINT256,
            ParameterOperation::Equal,
            false,
        );
        for (i, chunk) in value.chunks(32).enumerate() {
            self = self.push_rule(
                length_offset + 32 + (i as u64) * 32,
                left_word(chunk),
                mask::BYTES32,
                ParameterOperation::Equal,
                false,
            );
        }
        Ok(self)
    }

    /// Allow the function to be called at most once per session
    pub fn only_once(mut self) -> Result<Self> {
        if self.layout.is_none() {
            return Err(Error::builder(
                "must call forFunction(...) before calling onlyOnce()",
            ));
        }
        let selector = self
            .rules
            .iter_mut()
            .find(|r| r.offset.is_zero() && r.mask == mask::SELECTOR)
            .ok_or_else(|| Error::builder("selector rule missing"))?;
        selector.cumulative = true;
        Ok(self)
    }

    /// Finish the permission
    pub fn build(self) -> Result<Permission> {
        if self.rules.len() > MAX_RULES {
            return Err(Error::capacity(format!(
                "Too many rules: {} (max {})",
                self.rules.len(),
                MAX_RULES
            )));
        }
        Ok(Permission::new(self.target, self.rules))
    }
}

// ============================================================================
// Token recipes
// ============================================================================

/// ERC-20 permissions
pub struct Erc20PermissionBuilder;

impl Erc20PermissionBuilder {
    /// `transfer` with a cumulative amount limit
    pub fn build_transfer(target: Address, limit: U256) -> Result<Permission> {
        PermissionBuilder::for_target(target)
            .for_function("transfer(address to, uint256 value)")?
            .with_uint_n_param("value", limit, 256, ParameterOperation::LessThanOrEqual, true)?
            .build()
    }

    /// `approve` for one spender with a cumulative amount limit
    pub fn build_approve(target: Address, spender: Address, limit: U256) -> Result<Permission> {
        PermissionBuilder::for_target(target)
            .for_function("approve(address spender, uint256 value)")?
            .with_address_param("spender", spender, ParameterOperation::Equal, false)?
            .with_uint_n_param("value", limit, 256, ParameterOperation::LessThanOrEqual, true)?
            .build()
    }
}

/// ERC-721 permissions
pub struct Erc721PermissionBuilder;

impl Erc721PermissionBuilder {
    /// `transferFrom` of a single token
    pub fn build_transfer(target: Address, token_id: U256) -> Result<Permission> {
        PermissionBuilder::for_target(target)
            .for_function("transferFrom(address from, address to, uint256 tokenId)")?
            .with_uint_n_param("tokenId", token_id, 256, ParameterOperation::Equal, false)?
            .build()
    }

    /// `approve` of a single token for one spender
    pub fn build_approve(target: Address, spender: Address, token_id: U256) -> Result<Permission> {
        PermissionBuilder::for_target(target)
            .for_function("approve(address to, uint256 tokenId)")?
            .with_address_param("to", spender, ParameterOperation::Equal, false)?
            .with_uint_n_param("tokenId", token_id, 256, ParameterOperation::Equal, false)?
            .build()
    }
}

/// ERC-1155 permissions
pub struct Erc1155PermissionBuilder;

impl Erc1155PermissionBuilder {
    /// `safeTransferFrom` of one token id with a cumulative amount limit
    pub fn build_transfer(target: Address, id: U256, limit: U256) -> Result<Permission> {
        PermissionBuilder::for_target(target)
            .for_function(
                "safeTransferFrom(address from, address to, uint256 id, uint256 amount, bytes data)",
            )?
            .with_uint_n_param("id", id, 256, ParameterOperation::Equal, false)?
            .with_uint_n_param("amount", limit, 256, ParameterOperation::LessThanOrEqual, true)?
            .build()
    }

    /// `setApprovalForAll(operator, true)`
    pub fn build_approve_all(target: Address, operator: Address) -> Result<Permission> {
        PermissionBuilder::for_target(target)
            .for_function("setApprovalForAll(address operator, bool approved)")?
            .with_address_param("operator", operator, ParameterOperation::Equal, false)?
            .with_bool_param("approved", true, ParameterOperation::Equal, false)?
            .build()
    }
}
