//! Shared unit factories for integration tests

#![allow(dead_code)]

use avm2_abc::{
    AbcFile, As3Class, ClassId, DefaultValue, EncodeOptions, Instruction, JumpTarget, MethodBuilder,
    MethodFlags, MethodId, Multiname, MultinameKind, Namespace, NamespaceKind, Opcode, Operand,
    Trait, TraitAttributes, TraitKind,
};

pub fn instr(abc: &mut AbcFile, opcode: Opcode, operands: Vec<Operand>) -> Instruction {
    abc.create_instruction(opcode, operands).unwrap()
}

pub fn jump_to(abc: &mut AbcFile, opcode: Opcode, target: &Instruction) -> Instruction {
    instr(
        abc,
        opcode,
        vec![Operand::Target(JumpTarget::Instr(target.id()))],
    )
}

/// Handles into the unit built by [`game_unit`]
pub struct GameUnit {
    pub abc: AbcFile,
    pub main: ClassId,
    pub update: MethodId,
    pub script_init: MethodId,
}

/// `game.Main extends flash.display.Sprite` with one method, one slot, one
/// constant, plus the script that installs the class.
pub fn game_unit() -> GameUnit {
    let mut abc = AbcFile::new();
    let sprite = abc.create_adobe_class("flash.display.Sprite").unwrap();
    let public = abc.create_namespace(NamespaceKind::Package, "");
    let game = abc.create_namespace(NamespaceKind::Package, "game");
    let private = abc.create_namespace(NamespaceKind::Private, "game:Main");
    let int_type = abc.create_qname(public.clone(), "int").unwrap();
    let string_type = abc.create_qname(public.clone(), "String").unwrap();

    // Main()
    let body = vec![
        instr(&mut abc, Opcode::GetLocal0, vec![]),
        instr(&mut abc, Opcode::PushScope, vec![]),
        instr(&mut abc, Opcode::GetLocal0, vec![]),
        instr(&mut abc, Opcode::ConstructSuper, vec![Operand::U30(0)]),
        instr(&mut abc, Opcode::ReturnVoid, vec![]),
    ];
    let iinit = abc
        .create_method(
            MethodBuilder::new()
                .name("game:Main")
                .code(body)
                .frame(1, 1)
                .scope_depth(4, 5),
        )
        .unwrap();

    let cinit_body = vec![instr(&mut abc, Opcode::ReturnVoid, vec![])];
    let cinit = abc
        .create_method(MethodBuilder::new().code(cinit_body).frame(0, 1))
        .unwrap();

    // update(ticks:int, label:String = "idle"): void
    let ret = instr(&mut abc, Opcode::ReturnVoid, vec![]);
    let print = abc.create_qname(public.clone(), "trace").unwrap();
    let body = vec![
        instr(&mut abc, Opcode::GetLocal0, vec![]),
        instr(&mut abc, Opcode::PushScope, vec![]),
        instr(&mut abc, Opcode::PushByte, vec![Operand::S8(-5)]),
        instr(&mut abc, Opcode::PushInt, vec![Operand::Int(70_000)]),
        instr(&mut abc, Opcode::PushDouble, vec![Operand::Double(1.5)]),
        instr(&mut abc, Opcode::PushString, vec![Operand::string("tick")]),
        instr(&mut abc, Opcode::Pop, vec![]),
        instr(&mut abc, Opcode::Pop, vec![]),
        instr(&mut abc, Opcode::Pop, vec![]),
        instr(&mut abc, Opcode::Pop, vec![]),
        instr(&mut abc, Opcode::GetLocal1, vec![]),
        jump_to(&mut abc, Opcode::IfFalse, &ret),
        instr(&mut abc, Opcode::FindPropStrict, vec![Operand::Multiname(print.clone())]),
        instr(&mut abc, Opcode::GetLocal2, vec![]),
        instr(
            &mut abc,
            Opcode::CallPropVoid,
            vec![Operand::Multiname(print), Operand::U30(1)],
        ),
        ret,
    ];
    let update = abc
        .create_method(
            MethodBuilder::new()
                .name("update")
                .param(int_type.clone())
                .param(string_type.clone())
                .optional(DefaultValue::Utf8("idle".into()))
                .param_names(["ticks", "label"])
                .code(body)
                .frame(3, 3)
                .scope_depth(5, 6),
        )
        .unwrap();

    let name = abc.create_qname(game.clone(), "Main").unwrap();
    let main = abc
        .create_class(name.clone(), &As3Class::Adobe(sprite.clone()), iinit, cinit)
        .unwrap();

    let update_name = abc.create_qname(public.clone(), "update").unwrap();
    let speed = abc.create_qname(private, "speed").unwrap();
    let greeting = abc.create_qname(public.clone(), "GREETING").unwrap();
    {
        let class = abc.class_mut(main).unwrap();
        class.flags.sealed = true;
        class.instance_traits.push(Trait::method(update_name, update));
        class.instance_traits.push(Trait::new(
            speed,
            TraitKind::Slot {
                slot_id: 1,
                type_name: int_type,
                value: Some(DefaultValue::Int(-3)),
            },
        ));
        class.static_traits.push(Trait::new(
            greeting,
            TraitKind::Const {
                slot_id: 1,
                type_name: string_type,
                value: Some(DefaultValue::Utf8("hello".into())),
            },
        ));
    }

    let script_body = vec![
        instr(&mut abc, Opcode::GetLocal0, vec![]),
        instr(&mut abc, Opcode::PushScope, vec![]),
        instr(&mut abc, Opcode::ReturnVoid, vec![]),
    ];
    let script_init = abc
        .create_method(
            MethodBuilder::new()
                .code(script_body)
                .flags(MethodFlags::default())
                .frame(1, 1)
                .scope_depth(0, 1),
        )
        .unwrap();
    abc.create_script(script_init, vec![Trait::class(name, 1, main)])
        .unwrap();

    GameUnit {
        abc,
        main,
        update,
        script_init,
    }
}

/// Handles into the unit built by [`rich_unit`]
pub struct RichUnit {
    pub abc: AbcFile,
    pub widget: ClassId,
    pub shape: ClassId,
    pub draw: MethodId,
    pub as3: Namespace,
}

/// `game.Widget implements game.IShape`, exercising the name kinds, trait
/// kinds and default values that [`game_unit`] leaves out.
pub fn rich_unit() -> RichUnit {
    let mut abc = AbcFile::new();
    let object = abc.create_adobe_class("Object").unwrap();
    let public = abc.create_namespace(NamespaceKind::Package, "");
    let game = abc.create_namespace(NamespaceKind::Package, "game");
    let as3 = abc.create_namespace(NamespaceKind::Namespace, "http://adobe.com/AS3/2006/builtin");
    let protected = abc.create_namespace(NamespaceKind::Protected, "game:Widget");
    let lookup = abc.create_namespace_set(vec![public.clone(), game.clone()]);

    let uint_type = abc.create_qname(public.clone(), "uint").unwrap();
    let int_type = abc.create_qname(public.clone(), "int").unwrap();
    let vec_package = abc.create_namespace(NamespaceKind::Package, "__AS3__.vec");
    let vector = abc.create_qname(vec_package, "Vector").unwrap();
    let vector_int = abc.create_type_name(vector, vec![int_type]).unwrap();
    let trace = abc
        .create_multiname(MultinameKind::Multiname, Some("trace"), None, Some(lookup.clone()))
        .unwrap();
    let late = abc
        .create_multiname(MultinameKind::MultinameL, None, None, Some(lookup.clone()))
        .unwrap();
    let length = abc
        .create_multiname(MultinameKind::RTQName, Some("length"), None, None)
        .unwrap();
    let size_name = abc
        .create_multiname(MultinameKind::Multiname, Some("size"), None, Some(lookup))
        .unwrap();

    // game.IShape
    let shape_init = abc.create_method(MethodBuilder::new()).unwrap();
    let shape_cinit_body = vec![instr(&mut abc, Opcode::ReturnVoid, vec![])];
    let shape_cinit = abc
        .create_method(MethodBuilder::new().code(shape_cinit_body).frame(0, 1))
        .unwrap();
    let shape_draw = abc
        .create_method(MethodBuilder::new().name("draw"))
        .unwrap();
    let shape_name = abc.create_qname(game.clone(), "IShape").unwrap();
    let shape = abc
        .create_class(shape_name.clone(), &As3Class::Adobe(object.clone()), shape_init, shape_cinit)
        .unwrap();
    let draw_name = abc.create_qname(public.clone(), "draw").unwrap();
    {
        let class = abc.class_mut(shape).unwrap();
        class.flags.interface = true;
        class.super_name = Multiname::any();
        class.instance_traits.push(Trait::method(draw_name.clone(), shape_draw));
    }

    // Closure bound by the script and created with newfunction
    let helper_body = vec![
        instr(&mut abc, Opcode::PushNull, vec![]),
        instr(&mut abc, Opcode::ReturnValue, vec![]),
    ];
    let helper = abc
        .create_method(MethodBuilder::new().name("helper").code(helper_body).frame(1, 1))
        .unwrap();

    // game.Widget
    let body = vec![
        instr(&mut abc, Opcode::GetLocal0, vec![]),
        instr(&mut abc, Opcode::PushScope, vec![]),
        instr(&mut abc, Opcode::GetLocal0, vec![]),
        instr(&mut abc, Opcode::PushNamespace, vec![Operand::Namespace(as3.clone())]),
        instr(&mut abc, Opcode::GetProperty, vec![Operand::Multiname(length)]),
        instr(&mut abc, Opcode::Pop, vec![]),
        instr(&mut abc, Opcode::GetLocal0, vec![]),
        instr(&mut abc, Opcode::PushString, vec![Operand::string("key")]),
        instr(&mut abc, Opcode::GetProperty, vec![Operand::Multiname(late)]),
        instr(&mut abc, Opcode::Coerce, vec![Operand::Multiname(vector_int.clone())]),
        instr(&mut abc, Opcode::Pop, vec![]),
        instr(&mut abc, Opcode::NewFunction, vec![Operand::Method(helper)]),
        instr(&mut abc, Opcode::Pop, vec![]),
        instr(&mut abc, Opcode::GetLocal0, vec![]),
        instr(&mut abc, Opcode::ConstructSuper, vec![Operand::U30(0)]),
        instr(&mut abc, Opcode::ReturnVoid, vec![]),
    ];
    let widget_init = abc
        .create_method(MethodBuilder::new().name("game:Widget").code(body).frame(3, 1))
        .unwrap();
    let widget_cinit_body = vec![instr(&mut abc, Opcode::ReturnVoid, vec![])];
    let widget_cinit = abc
        .create_method(MethodBuilder::new().code(widget_cinit_body).frame(0, 1))
        .unwrap();

    let getter_body = vec![
        instr(&mut abc, Opcode::PushUint, vec![Operand::UInt(4_000_000_000)]),
        instr(&mut abc, Opcode::ReturnValue, vec![]),
    ];
    let get_size = abc
        .create_method(
            MethodBuilder::new()
                .name("size")
                .return_type(uint_type.clone())
                .code(getter_body)
                .frame(1, 1),
        )
        .unwrap();
    let setter_body = vec![
        instr(&mut abc, Opcode::FindPropStrict, vec![Operand::Multiname(trace.clone())]),
        instr(&mut abc, Opcode::GetLocal1, vec![]),
        instr(&mut abc, Opcode::CallPropVoid, vec![Operand::Multiname(trace), Operand::U30(1)]),
        instr(&mut abc, Opcode::ReturnVoid, vec![]),
    ];
    let set_size = abc
        .create_method(
            MethodBuilder::new()
                .name("size")
                .param(uint_type.clone())
                .code(setter_body)
                .frame(2, 2),
        )
        .unwrap();
    let draw = abc
        .create_method(MethodBuilder::new().name("draw").flags(MethodFlags {
            native: true,
            ..MethodFlags::default()
        }))
        .unwrap();

    let widget_name = abc.create_qname(game.clone(), "Widget").unwrap();
    let widget = abc
        .create_class(widget_name.clone(), &As3Class::Adobe(object), widget_init, widget_cinit)
        .unwrap();

    let event = abc.create_metadata("Event", &[(Some("name"), "change"), (None, "bubbles")]);
    let mode = abc.create_qname(public.clone(), "mode").unwrap();
    let limit = abc.create_qname(protected.clone(), "limit").unwrap();
    let items = abc.create_qname(public.clone(), "ITEMS").unwrap();
    {
        let class = abc.class_mut(widget).unwrap();
        class.flags.sealed = true;
        class.protected_ns = Some(protected);
        class.interfaces.push(shape_name.clone());
        class
            .instance_traits
            .push(Trait::new(size_name.clone(), TraitKind::Getter { disp_id: 1, method: get_size }));
        class
            .instance_traits
            .push(Trait::new(size_name, TraitKind::Setter { disp_id: 2, method: set_size }));
        let mut draw_trait = Trait::method(draw_name, draw);
        draw_trait.attrs = TraitAttributes {
            is_final: true,
            is_override: false,
        };
        draw_trait.metadata.push(event);
        class.instance_traits.push(draw_trait);
        class.instance_traits.push(Trait::new(
            mode,
            TraitKind::Slot {
                slot_id: 1,
                type_name: Multiname::any(),
                value: Some(DefaultValue::Namespace(as3.clone())),
            },
        ));
        let mut limit_trait = Trait::new(
            limit,
            TraitKind::Slot {
                slot_id: 2,
                type_name: uint_type,
                value: Some(DefaultValue::UInt(4_000_000_000)),
            },
        );
        limit_trait.metadata.push(event);
        class.instance_traits.push(limit_trait);
        class.static_traits.push(Trait::new(
            items,
            TraitKind::Const {
                slot_id: 1,
                type_name: vector_int,
                value: Some(DefaultValue::Null),
            },
        ));
    }

    let script_body = vec![
        instr(&mut abc, Opcode::GetLocal0, vec![]),
        instr(&mut abc, Opcode::PushScope, vec![]),
        instr(&mut abc, Opcode::PushNull, vec![]),
        instr(&mut abc, Opcode::NewClass, vec![Operand::Class(shape)]),
        instr(&mut abc, Opcode::Pop, vec![]),
        instr(&mut abc, Opcode::PushNull, vec![]),
        instr(&mut abc, Opcode::NewClass, vec![Operand::Class(widget)]),
        instr(&mut abc, Opcode::Pop, vec![]),
        instr(&mut abc, Opcode::ReturnVoid, vec![]),
    ];
    let script_init = abc
        .create_method(MethodBuilder::new().code(script_body).frame(2, 1).scope_depth(0, 1))
        .unwrap();
    let helper_name = abc.create_qname(game, "helper").unwrap();
    abc.create_script(
        script_init,
        vec![
            Trait::class(shape_name, 1, shape),
            Trait::class(widget_name, 2, widget),
            Trait::new(helper_name, TraitKind::Function { slot_id: 3, method: helper }),
        ],
    )
    .unwrap();

    RichUnit {
        abc,
        widget,
        shape,
        draw,
        as3,
    }
}

/// Encode [`game_unit`] with default options
pub fn game_bytes() -> Vec<u8> {
    game_unit().abc.encode(&EncodeOptions::default()).unwrap()
}

/// A unit holding a single script whose init method has `code` as its body
pub fn single_method_unit(build: impl FnOnce(&mut AbcFile) -> Vec<Instruction>) -> (AbcFile, MethodId) {
    let mut abc = AbcFile::new();
    let code = build(&mut abc);
    let id = abc
        .create_method(MethodBuilder::new().name("run").code(code).frame(2, 1))
        .unwrap();
    abc.create_script(id, Vec::new()).unwrap();
    (abc, id)
}
