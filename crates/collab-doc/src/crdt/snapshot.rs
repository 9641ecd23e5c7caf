//! Serializable mirror of the element model.
//!
//! [`CrdtElement`] serializes through [`ElementStruct`], which keeps
//! tombstones, move tickets and split fragments so a replica rebuilt from a
//! snapshot resolves later operations exactly like the original.

use serde::{Deserialize, Serialize};

use super::rga_tree_split::{RgaTreeSplit, SplitNodeId};
use super::rht::Rht;
use super::tree::TreeNodeData;
use super::{
    CounterValue, CrdtArray, CrdtElement, CrdtObject, CrdtText, CrdtTree, ElementMeta, ElementValue,
    PrimitiveValue, TextValue,
};
use crate::clock::TimeTicket;
use crate::error::DocError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementStruct {
    pub created_at: TimeTicket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_at: Option<TimeTicket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<TimeTicket>,
    pub value: ValueStruct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueStruct {
    Primitive { value: PrimitiveValue },
    Counter { value: CounterValue },
    Object { members: Vec<MemberStruct> },
    Array { elements: Vec<ElementStruct> },
    Text { blocks: Vec<TextBlockStruct> },
    Tree { root: TreeNodeData },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStruct {
    pub key: String,
    pub element: ElementStruct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlockStruct {
    pub id: SplitNodeId,
    pub content: String,
    #[serde(default)]
    pub attrs: Rht,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<TimeTicket>,
}

impl From<&CrdtElement> for ElementStruct {
    fn from(element: &CrdtElement) -> Self {
        let value = match &element.value {
            ElementValue::Primitive(p) => ValueStruct::Primitive { value: p.clone() },
            ElementValue::Counter(c) => ValueStruct::Counter { value: *c },
            ElementValue::Object(o) => ValueStruct::Object {
                members: o
                    .entries()
                    .map(|(key, e)| MemberStruct {
                        key: key.to_owned(),
                        element: ElementStruct::from(e),
                    })
                    .collect(),
            },
            ElementValue::Array(a) => ValueStruct::Array {
                elements: a.elements().map(ElementStruct::from).collect(),
            },
            ElementValue::Text(t) => ValueStruct::Text {
                blocks: t
                    .rga()
                    .blocks()
                    .map(|(id, value, removed_at)| TextBlockStruct {
                        id,
                        content: value.content().to_owned(),
                        attrs: value.attrs().clone(),
                        removed_at,
                    })
                    .collect(),
            },
            ElementValue::Tree(t) => ValueStruct::Tree { root: t.to_data() },
        };
        ElementStruct {
            created_at: element.meta.created_at,
            moved_at: element.meta.moved_at,
            removed_at: element.meta.removed_at,
            value,
        }
    }
}

impl From<CrdtElement> for ElementStruct {
    fn from(element: CrdtElement) -> Self {
        ElementStruct::from(&element)
    }
}

impl TryFrom<ElementStruct> for CrdtElement {
    type Error = DocError;

    fn try_from(s: ElementStruct) -> Result<Self, Self::Error> {
        let value = match s.value {
            ValueStruct::Primitive { value } => ElementValue::Primitive(value),
            ValueStruct::Counter { value } => ElementValue::Counter(value),
            ValueStruct::Object { members } => {
                let mut object = CrdtObject::new();
                for member in members {
                    object.restore(&member.key, CrdtElement::try_from(member.element)?);
                }
                ElementValue::Object(object)
            }
            ValueStruct::Array { elements } => {
                let mut array = CrdtArray::new();
                for element in elements {
                    array.push(CrdtElement::try_from(element)?)?;
                }
                ElementValue::Array(array)
            }
            ValueStruct::Text { blocks } => {
                let mut rga = RgaTreeSplit::new();
                for block in blocks {
                    rga.push(
                        block.id,
                        TextValue::with_attrs(block.content, block.attrs),
                        block.removed_at,
                    );
                }
                ElementValue::Text(CrdtText::from_rga(rga))
            }
            ValueStruct::Tree { root } => ElementValue::Tree(CrdtTree::from_data(&root)?),
        };
        Ok(CrdtElement {
            meta: ElementMeta {
                created_at: s.created_at,
                moved_at: s.moved_at,
                removed_at: s.removed_at,
            },
            value,
        })
    }
}
